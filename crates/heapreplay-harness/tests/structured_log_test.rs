//! Replay records round through the JSONL emitter and pass validation.

use std::io::Write;
use std::sync::{Arc, Mutex};

use heapreplay_alloc::SystemBackend;
use heapreplay_core::{ReplayConfig, ReplayLogLevel, ReplayMode, parse_trace, replay};
use heapreplay_harness::{LogEmitter, LogEntry, LogLevel, validate_log_line};

/// Writer that keeps its bytes reachable after the emitter is done.
#[derive(Clone, Default)]
struct SharedBuf(Arc<Mutex<Vec<u8>>>);

impl Write for SharedBuf {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl SharedBuf {
    fn text(&self) -> String {
        String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
    }
}

#[test]
fn every_emitted_replay_record_validates() {
    let trace = parse_trace("N 1 16 0 1 0 0\nN 1 16 0 1 0 0\nZ 4\nD 7 0 0\nN 2 16 0 1 0 0\n");
    for mode in ReplayMode::ALL {
        let backend = SystemBackend::new();
        let config = ReplayConfig::new(mode).with_log_level(ReplayLogLevel::Trace);
        let outcome = replay(&trace, config, &backend);
        assert!(!outcome.logs.is_empty());

        let buf = SharedBuf::default();
        let mut emitter = LogEmitter::to_writer(buf.clone(), "test-run");
        emitter.emit(LogLevel::Info, "replay_start").unwrap();
        emitter.emit_records(&outcome.logs).unwrap();
        emitter.flush().unwrap();
        assert_eq!(emitter.lines_written() as usize, outcome.logs.len() + 1);

        let text = buf.text();
        for (i, line) in text.lines().enumerate() {
            let entry = validate_log_line(line, i + 1)
                .unwrap_or_else(|errs| panic!("{mode}: line {} invalid: {errs:?}", i + 1));
            if i > 0 {
                assert_eq!(entry.mode.as_deref(), Some(mode.as_str()));
                assert!(entry.decision_id.is_some());
                assert_eq!(entry.run_id.as_deref(), Some("test-run"));
            }
        }
        assert!(text.contains("\"event\":\"parse_failure\""), "{mode}");
    }
}

#[test]
fn run_level_trace_ids_are_sequential() {
    let buf = SharedBuf::default();
    let mut emitter = LogEmitter::to_writer(buf.clone(), "seq");
    let first = emitter.emit(LogLevel::Info, "replay_start").unwrap();
    let second = emitter.emit(LogLevel::Info, "replay_complete").unwrap();
    assert_eq!(first.trace_id, "heapreplay::seq::001");
    assert_eq!(second.trace_id, "heapreplay::seq::002");
    assert_eq!(buf.text().lines().count(), 2);
}

#[test]
fn missing_required_fields_are_reported() {
    let errors = validate_log_line(r#"{"trace_id":"a::b::c","level":"info"}"#, 9).unwrap_err();
    let fields: Vec<&str> = errors.iter().map(|e| e.field.as_str()).collect();
    assert_eq!(fields, vec!["timestamp", "event"]);
    assert!(errors.iter().all(|e| e.line_number == 9));
}

#[test]
fn malformed_trace_ids_and_json_are_rejected() {
    let short = r#"{"timestamp":"t","trace_id":"flat","level":"info","event":"e"}"#;
    assert_eq!(validate_log_line(short, 1).unwrap_err()[0].field, "trace_id");
    assert_eq!(validate_log_line("{not json", 1).unwrap_err()[0].field, "<json>");
    assert_eq!(validate_log_line("[1,2]", 1).unwrap_err()[0].field, "<root>");
}

#[test]
fn entries_built_by_hand_validate() {
    let entry = LogEntry::new("heapreplay::manual::001", LogLevel::Warn, "note")
        .with_mode(ReplayMode::Oracle)
        .with_outcome("dropped")
        .with_backend("system (rust global allocator)")
        .with_duration_ms(3);
    let line = entry.to_jsonl().unwrap();
    let back = validate_log_line(&line, 1).unwrap();
    assert_eq!(back, entry);
}
