//! Human-readable replay summary.

use heapreplay_core::{ReplayMode, ReplayReport};

const W_LABEL: usize = 28;

#[must_use]
pub fn render_summary(report: &ReplayReport, show_backend_stats: bool) -> String {
    use std::fmt::Write as _;
    let mut out = String::new();
    let stats = &report.statistics;

    writeln!(
        out,
        "heapreplay summary (mode={}, backend={})",
        report.mode, report.backend.name
    )
    .ok();
    writeln!(out, "{}", "-".repeat(W_LABEL + 24)).ok();

    let mut row = |label: &str, value: String| {
        writeln!(out, "{label:<W_LABEL$} {value}").ok();
    };

    if let Some(path) = &report.trace.path {
        row("trace", path.clone());
    }
    if let Some(sha) = &report.trace.sha256 {
        row("trace sha256", sha.clone());
    }
    let ingest = &report.trace.ingest;
    row("events replayed", report.events_processed.to_string());
    if ingest.parse_failures > 0 || ingest.unknown_tags > 0 {
        row(
            "lines dropped",
            format!(
                "{} ({} unknown tags)",
                ingest.parse_failures, ingest.unknown_tags
            ),
        );
    }
    row("replay time", format_ns(report.replay_time_ns));
    row(
        "allocations",
        format!(
            "{} ({} bytes)",
            stats.total_allocations, stats.bytes_allocated
        ),
    );
    row(
        "frees",
        format!("{} ({} bytes)", stats.total_frees, stats.bytes_freed),
    );
    row("failed allocations", stats.failed_allocations.to_string());
    row("failed frees", stats.failed_frees.to_string());
    if stats.duplicate_allocations > 0 {
        row("duplicate allocations", stats.duplicate_allocations.to_string());
    }
    row("field updates", stats.field_updates.to_string());
    row(
        "method entries/exits",
        format!("{}/{}", stats.method_entries, stats.method_exits),
    );
    row("peak live bytes", stats.peak_live_bytes.to_string());
    row("final live bytes", stats.current_live_bytes.to_string());
    if report.never_freed() > 0 {
        row(
            "never freed by trace",
            format!(
                "{} ({} bytes)",
                stats.teardown_released_objects, stats.teardown_released_bytes
            ),
        );
    }
    if let Some(mean) = report.lifetime.mean {
        row(
            "object lifetime",
            format!(
                "mean {mean:.1}, min {}, max {}",
                report.lifetime.min.unwrap_or(0),
                report.lifetime.max.unwrap_or(0)
            ),
        );
    }
    if stats.working_set_samples > 0 {
        row(
            "working-set samples",
            format!(
                "{} ({} reads)",
                stats.working_set_samples, stats.working_set_reads
            ),
        );
    }

    match report.mode {
        ReplayMode::Gc => {
            let gc = &stats.gc;
            if let Some(cfg) = &report.gc_config {
                row(
                    "gc thresholds",
                    format!(
                        "{} bytes / {} allocations",
                        cfg.byte_threshold, cfg.alloc_count_threshold
                    ),
                );
            }
            row(
                "gc collections",
                format!(
                    "{} (bytes {}, count {}, failure {})",
                    gc.collections, gc.byte_triggered, gc.count_triggered, gc.failure_triggered
                ),
            );
            row(
                "gc reclaimed",
                format!("{} ({} bytes)", gc.reclaimed_objects, gc.reclaimed_bytes),
            );
            row("gc time", format_ns(gc.gc_time_ns));
            if gc.allocation_retries > 0 {
                row(
                    "gc allocation retries",
                    format!("{} ({} succeeded)", gc.allocation_retries, gc.retry_successes),
                );
            }
            if let Some(fin) = &gc.final_collection {
                row(
                    "final collection",
                    format!(
                        "{} marked, {} reclaimed ({} bytes)",
                        fin.marked_dead, fin.reclaimed_objects, fin.reclaimed_bytes
                    ),
                );
            }
        }
        ReplayMode::Oracle => {
            let oracle = &stats.oracle;
            row(
                "oracle frees",
                format!("{} queued, {} drained", oracle.queued_frees, oracle.drained_frees),
            );
            row("drains before alloc", oracle.drains_before_alloc.to_string());
            row("end-of-trace drained", oracle.end_of_trace_drained.to_string());
            row("max queue length", oracle.max_queue_len.to_string());
            if oracle.discarded_unknown > 0 {
                row("discarded unknown", oracle.discarded_unknown.to_string());
            }
        }
        ReplayMode::Explicit => {}
    }

    if report.log_records_dropped > 0 {
        writeln!(
            out,
            "{:<W_LABEL$} {}",
            "log records dropped", report.log_records_dropped
        )
        .ok();
    }

    if !report.hot_sites.is_empty() {
        writeln!(out).ok();
        writeln!(out, "{:<6} {:>12} {:>14} {:>12}", "rank", "site", "allocations", "bytes").ok();
        for (rank, site) in report.hot_sites.iter().enumerate() {
            writeln!(
                out,
                "{:<6} {:>12} {:>14} {:>12}",
                rank + 1,
                site.site_id,
                site.allocations,
                site.bytes
            )
            .ok();
        }
    }

    if show_backend_stats {
        writeln!(out).ok();
        let backend = &report.backend;
        if backend.fell_back {
            writeln!(
                out,
                "allocator '{}' unknown, used '{}'",
                backend.requested, backend.resolved
            )
            .ok();
        }
        if let Some(limit) = backend.heap_limit {
            writeln!(out, "{:<W_LABEL$} {limit}", "heap limit").ok();
        }
        match &backend.stats {
            Some(s) => {
                writeln!(out, "{:<W_LABEL$} {}", "backend allocations", s.allocations).ok();
                writeln!(out, "{:<W_LABEL$} {}", "backend deallocations", s.deallocations).ok();
                writeln!(out, "{:<W_LABEL$} {}", "backend reallocations", s.reallocations).ok();
                writeln!(out, "{:<W_LABEL$} {}", "backend failures", s.failures).ok();
                writeln!(out, "{:<W_LABEL$} {}", "backend outstanding bytes", s.outstanding_bytes).ok();
                writeln!(
                    out,
                    "{:<W_LABEL$} {}",
                    "backend peak bytes", s.peak_outstanding_bytes
                )
                .ok();
            }
            None => {
                writeln!(out, "backend '{}' keeps no statistics", backend.name).ok();
            }
        }
    }

    out
}

fn format_ns(ns: u64) -> String {
    if ns >= 1_000_000_000 {
        format!("{:.3} s", ns as f64 / 1e9)
    } else if ns >= 1_000_000 {
        format!("{:.3} ms", ns as f64 / 1e6)
    } else if ns >= 1_000 {
        format!("{:.3} us", ns as f64 / 1e3)
    } else {
        format!("{ns} ns")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use heapreplay_alloc::select_backend;
    use heapreplay_core::{BackendInfo, ReplayConfig, parse_trace, replay};

    fn report_for(mode: ReplayMode, text: &str) -> ReplayReport {
        let selection = select_backend("standard");
        let trace = parse_trace(text);
        let outcome = replay(&trace, ReplayConfig::new(mode), selection.backend.as_ref());
        ReplayReport::new(&outcome, &trace, BackendInfo::from_selection(&selection, None))
    }

    #[test]
    fn summary_lists_peak_and_hot_sites() {
        let report = report_for(
            ReplayMode::Explicit,
            "timestamp,event_type,object_id,size,site_id,thread_id,type_id\n\
             1,alloc,1,10,5,0,0\n\
             2,alloc,2,20,5,0,0\n\
             3,free,1,,,,\n",
        );
        let text = render_summary(&report, false);
        assert!(text.starts_with("heapreplay summary (mode=explicit"));
        assert!(text.contains("peak live bytes"));
        assert!(text.contains("never freed by trace"));
        assert!(text.lines().any(|l| l.starts_with("1 ") && l.contains(" 5 ")));
        assert!(!text.contains("backend allocations"));
    }

    #[test]
    fn backend_stats_are_opt_in() {
        let report = report_for(ReplayMode::Oracle, "N 1 16 0 0 0 0\nD 1 0 1\n");
        let text = render_summary(&report, true);
        assert!(text.contains("backend allocations"));
        assert!(text.contains("end-of-trace drained"));
    }

    #[test]
    fn durations_pick_a_readable_unit() {
        assert_eq!(format_ns(12), "12 ns");
        assert_eq!(format_ns(1_500), "1.500 us");
        assert_eq!(format_ns(2_000_000_000), "2.000 s");
    }
}
