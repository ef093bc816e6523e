//! Event source: trace ingestion.
//!
//! Two record shapes are accepted:
//!
//! * oracle CSV rows `timestamp,event_type,object_id,size,site_id,thread_id,type_id`
//! * structured records, whitespace separated, first token a one-letter tag
//!   (`N`, `A`, `D`, `U`, `M`, `E`)
//!
//! The shape is fixed by the first record line of the input. Blank lines,
//! `#` comments and CSV headers are skipped. Malformed records are dropped and
//! tallied in [`IngestSummary`]. Loaded events are stably sorted by timestamp.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use serde::Serialize;

use crate::error::{ParseError, ReplayError};
use crate::event::{Event, EventKind};

/// How many parse failures are kept verbatim.
pub const FAILURE_SAMPLE_LIMIT: usize = 64;

const CSV_FIELDS: usize = 7;

/// Record shape of a trace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TraceFormat {
    Csv,
    Structured,
}

impl TraceFormat {
    /// Guess the shape from a record line.
    #[must_use]
    pub fn detect(line: &str) -> Self {
        if line.contains(',') {
            Self::Csv
        } else {
            Self::Structured
        }
    }
}

/// A dropped line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParseFailure {
    /// 1-based line number.
    pub line: usize,
    #[serde(serialize_with = "serialize_display")]
    pub error: ParseError,
}

fn serialize_display<S: serde::Serializer>(
    error: &ParseError,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.collect_str(error)
}

/// What ingestion saw.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IngestSummary {
    pub format: Option<TraceFormat>,
    pub lines_read: usize,
    pub events: usize,
    /// Blank, comment and header lines.
    pub skipped_lines: usize,
    pub parse_failures: usize,
    pub unknown_tags: usize,
    /// Input was not already in timestamp order.
    pub reordered: bool,
    /// First [`FAILURE_SAMPLE_LIMIT`] failures.
    pub failure_sample: Vec<ParseFailure>,
}

/// Sorted events plus ingestion summary.
#[derive(Debug, Clone, Default)]
pub struct Trace {
    pub events: Vec<Event>,
    pub summary: IngestSummary,
    /// Largest timestamp seen, used for end-of-trace finalization.
    pub end_time: u64,
}

/// Open and parse a trace file. Only I/O errors are fatal.
pub fn load_trace(path: &Path) -> Result<Trace, ReplayError> {
    let file = File::open(path).map_err(|source| ReplayError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    read_trace(BufReader::new(file)).map_err(|source| ReplayError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Parse a trace from any buffered reader. Invalid UTF-8 only spoils the
/// affected line.
pub fn read_trace<R: BufRead>(reader: R) -> std::io::Result<Trace> {
    let mut loader = TraceLoader::default();
    for chunk in reader.split(b'\n') {
        let bytes = chunk?;
        loader.feed(&String::from_utf8_lossy(&bytes));
    }
    Ok(loader.finish())
}

/// Parse a trace held in memory.
#[must_use]
pub fn parse_trace(text: &str) -> Trace {
    let mut loader = TraceLoader::default();
    for line in text.lines() {
        loader.feed(line);
    }
    loader.finish()
}

#[derive(Debug, Default)]
struct TraceLoader {
    events: Vec<Event>,
    summary: IngestSummary,
    clock: u64,
}

impl TraceLoader {
    fn feed(&mut self, raw: &str) {
        self.summary.lines_read += 1;
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            self.summary.skipped_lines += 1;
            return;
        }
        let format = *self
            .summary
            .format
            .get_or_insert_with(|| TraceFormat::detect(line));
        if format == TraceFormat::Csv && is_csv_header(line) {
            self.summary.skipped_lines += 1;
            return;
        }
        let parsed = match format {
            TraceFormat::Csv => parse_csv_line(line),
            TraceFormat::Structured => parse_structured_line(line, &mut self.clock),
        };
        match parsed {
            Ok(event) => self.events.push(event),
            Err(error) => {
                self.summary.parse_failures += 1;
                if matches!(error, ParseError::UnknownTag(_)) {
                    self.summary.unknown_tags += 1;
                }
                if self.summary.failure_sample.len() < FAILURE_SAMPLE_LIMIT {
                    self.summary.failure_sample.push(ParseFailure {
                        line: self.summary.lines_read,
                        error,
                    });
                }
            }
        }
    }

    fn finish(mut self) -> Trace {
        self.summary.reordered = !self.events.is_sorted_by_key(|event| event.time);
        if self.summary.reordered {
            // stable: equal timestamps keep input order
            self.events.sort_by_key(|event| event.time);
        }
        self.summary.events = self.events.len();
        let end_time = self.events.last().map_or(0, |event| event.time);
        Trace {
            events: self.events,
            summary: self.summary,
            end_time,
        }
    }
}

fn is_csv_header(line: &str) -> bool {
    line.split(',')
        .next()
        .is_some_and(|first| first.trim().eq_ignore_ascii_case("timestamp"))
}

fn number(field: &'static str, value: &str) -> Result<u64, ParseError> {
    value.trim().parse().map_err(|_| ParseError::InvalidField {
        field,
        value: value.trim().to_string(),
    })
}

fn number_or_zero(field: &'static str, value: &str) -> Result<u64, ParseError> {
    if value.trim().is_empty() {
        Ok(0)
    } else {
        number(field, value)
    }
}

/// Parse one oracle CSV row.
pub fn parse_csv_line(line: &str) -> Result<Event, ParseError> {
    let fields: Vec<&str> = line.split(',').collect();
    if fields.len() != CSV_FIELDS {
        return Err(ParseError::Arity {
            expected: CSV_FIELDS,
            found: fields.len(),
        });
    }
    let time = number("timestamp", fields[0])?;
    let object_id = number("object_id", fields[2])?;
    match fields[1].trim() {
        "alloc" => Ok(Event {
            time,
            object_id,
            thread_id: number("thread_id", fields[5])?,
            kind: EventKind::Alloc {
                size: number("size", fields[3])?,
                site_id: number("site_id", fields[4])?,
                type_id: number("type_id", fields[6])?,
                is_array: false,
                length: 0,
            },
        }),
        "free" => {
            number_or_zero("size", fields[3])?;
            number_or_zero("site_id", fields[4])?;
            number_or_zero("type_id", fields[6])?;
            Ok(Event {
                time,
                object_id,
                thread_id: number_or_zero("thread_id", fields[5])?,
                kind: EventKind::Free,
            })
        }
        other => Err(ParseError::UnknownEventType(other.to_string())),
    }
}

fn expect_arity(fields: &[&str], expected: usize) -> Result<(), ParseError> {
    if fields.len() == expected {
        Ok(())
    } else {
        Err(ParseError::Arity {
            expected,
            found: fields.len(),
        })
    }
}

/// Parse one structured record. `clock` is the logical clock: it advances
/// on method entry/exit and stamps records that carry no timestamp.
pub fn parse_structured_line(line: &str, clock: &mut u64) -> Result<Event, ParseError> {
    let mut tokens = line.split_whitespace();
    let tag = tokens.next().unwrap_or_default();
    let fields: Vec<&str> = tokens.collect();
    match tag {
        "N" | "A" => {
            expect_arity(&fields, 6)?;
            Ok(Event {
                time: *clock,
                object_id: number("object_id", fields[0])?,
                thread_id: number("thread_id", fields[5])?,
                kind: EventKind::Alloc {
                    size: number("size", fields[1])?,
                    type_id: number("type_id", fields[2])?,
                    site_id: number("site_id", fields[3])?,
                    length: number("length", fields[4])?,
                    is_array: tag == "A",
                },
            })
        }
        "D" => {
            expect_arity(&fields, 3)?;
            Ok(Event {
                object_id: number("object_id", fields[0])?,
                thread_id: number("thread_id", fields[1])?,
                time: number("timestamp", fields[2])?,
                kind: EventKind::Free,
            })
        }
        "U" => {
            expect_arity(&fields, 4)?;
            Ok(Event {
                time: *clock,
                object_id: number("tgt_id", fields[0])?,
                thread_id: number("thread_id", fields[3])?,
                kind: EventKind::FieldUpdate {
                    source_id: number("src_id", fields[1])?,
                    field_id: number("field_id", fields[2])?,
                },
            })
        }
        "M" => {
            expect_arity(&fields, 3)?;
            let method_id = number("method_id", fields[0])?;
            let receiver = number("receiver_id", fields[1])?;
            let thread_id = number("thread_id", fields[2])?;
            *clock += 1;
            Ok(Event {
                time: *clock,
                object_id: receiver,
                thread_id,
                kind: EventKind::MethodEntry { method_id },
            })
        }
        "E" => {
            expect_arity(&fields, 2)?;
            let method_id = number("method_id", fields[0])?;
            let thread_id = number("thread_id", fields[1])?;
            *clock += 1;
            Ok(Event {
                time: *clock,
                object_id: 0,
                thread_id,
                kind: EventKind::MethodExit { method_id },
            })
        }
        other => Err(ParseError::UnknownTag(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn csv_header_comments_and_blanks_are_skipped() {
        let trace = parse_trace(
            "timestamp,event_type,object_id,size,site_id,thread_id,type_id\n\
             # comment\n\
             \n\
             1,alloc,7,32,3,1,9\n\
             2,free,7,,,,\n",
        );
        assert_eq!(trace.summary.format, Some(TraceFormat::Csv));
        assert_eq!(trace.summary.skipped_lines, 3);
        assert_eq!(trace.summary.parse_failures, 0);
        assert_eq!(trace.events.len(), 2);
        assert_eq!(trace.events[1].kind, EventKind::Free);
        assert_eq!(trace.end_time, 2);
    }

    #[test]
    fn csv_malformed_rows_are_dropped_and_sampled() {
        let trace = parse_trace(
            "1,alloc,1,10,0,0,0\n\
             2,alloc,x,10,0,0,0\n\
             3,alloc,2,10\n\
             4,realloc,3,10,0,0,0\n\
             5,alloc,4,10,,0,0\n",
        );
        assert_eq!(trace.events.len(), 1);
        assert_eq!(trace.summary.parse_failures, 4);
        let errors: Vec<_> = trace
            .summary
            .failure_sample
            .iter()
            .map(|f| (f.line, f.error.clone()))
            .collect();
        assert_eq!(
            errors,
            vec![
                (
                    2,
                    ParseError::InvalidField {
                        field: "object_id",
                        value: "x".into()
                    }
                ),
                (
                    3,
                    ParseError::Arity {
                        expected: 7,
                        found: 4
                    }
                ),
                (4, ParseError::UnknownEventType("realloc".into())),
                (
                    5,
                    ParseError::InvalidField {
                        field: "site_id",
                        value: String::new()
                    }
                ),
            ]
        );
    }

    #[test]
    fn events_are_stably_sorted_by_timestamp() {
        let trace = parse_trace(
            "5,alloc,1,8,0,0,0\n\
             3,alloc,2,8,0,0,0\n\
             3,alloc,3,8,0,0,0\n\
             1,alloc,4,8,0,0,0\n",
        );
        assert!(trace.summary.reordered);
        let ids: Vec<u64> = trace.events.iter().map(|e| e.object_id).collect();
        assert_eq!(ids, vec![4, 2, 3, 1]);
    }

    #[test]
    fn structured_records_use_a_logical_clock() {
        let trace = parse_trace(
            "N 1 24 5 100 0 1\n\
             M 7 1 1\n\
             A 2 64 6 101 8 1\n\
             U 1 2 3 1\n\
             E 7 1\n\
             D 1 1 2\n",
        );
        assert_eq!(trace.summary.format, Some(TraceFormat::Structured));
        assert_eq!(trace.summary.parse_failures, 0);
        let stamps: Vec<(&str, u64)> = trace.events.iter().map(|e| (e.label(), e.time)).collect();
        assert_eq!(
            stamps,
            vec![
                ("alloc", 0),
                ("method_entry", 1),
                ("alloc", 1),
                ("field_update", 1),
                ("method_exit", 2),
                ("free", 2),
            ]
        );
        assert_eq!(
            trace.events[2].kind,
            EventKind::Alloc {
                size: 64,
                site_id: 101,
                type_id: 6,
                is_array: true,
                length: 8
            }
        );
        assert_eq!(
            trace.events[3].kind,
            EventKind::FieldUpdate {
                source_id: 2,
                field_id: 3
            }
        );
    }

    #[test]
    fn structured_death_moves_to_its_logical_position() {
        let trace = parse_trace(
            "N 1 16 0 0 0 0\n\
             M 1 0 0\n\
             E 1 0\n\
             N 2 16 0 0 0 0\n\
             D 1 0 1\n",
        );
        assert!(trace.summary.reordered);
        let labels: Vec<(u64, &str)> = trace
            .events
            .iter()
            .map(|e| (e.time, e.label()))
            .collect();
        // the death (t=1) lands after the method entry that also carries t=1
        assert_eq!(
            labels,
            vec![
                (0, "alloc"),
                (1, "method_entry"),
                (1, "free"),
                (2, "method_exit"),
                (2, "alloc")
            ]
        );
    }

    #[test]
    fn unknown_tags_and_wrong_arity_are_recoverable() {
        let trace = parse_trace(
            "N 1 16 0 0 0 0\n\
             X 1 2 3\n\
             D 1 0\n\
             N 2 16 0 0 0 0 extra\n\
             N 3 16 0 0 0 0\n",
        );
        assert_eq!(trace.events.len(), 2);
        assert_eq!(trace.summary.unknown_tags, 1);
        assert_eq!(trace.summary.parse_failures, 3);
        assert_eq!(
            trace.summary.failure_sample[0].error,
            ParseError::UnknownTag("X".into())
        );
    }

    #[test]
    fn failure_sample_is_bounded() {
        let text: String = (0..200).map(|i| format!("{i},bogus,1,1,1,1,1\n")).collect();
        let trace = parse_trace(&text);
        assert_eq!(trace.summary.parse_failures, 200);
        assert_eq!(trace.summary.failure_sample.len(), FAILURE_SAMPLE_LIMIT);
    }

    #[test]
    fn read_trace_tolerates_invalid_utf8() {
        let bytes: &[u8] = b"1,alloc,1,8,0,0,0\n\xff\xfe,alloc\n2,free,1,8,0,0,0\n";
        let trace = read_trace(bytes).expect("in-memory read");
        assert_eq!(trace.events.len(), 2);
        assert_eq!(trace.summary.parse_failures, 1);
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let err = load_trace(Path::new("/nonexistent/heapreplay/trace.csv"))
            .expect_err("missing trace must fail");
        assert!(matches!(err, ReplayError::Io { .. }));
        assert!(err.to_string().contains("/nonexistent/heapreplay/trace.csv"));
    }

    #[test]
    fn empty_input_is_an_empty_trace() {
        let trace = parse_trace("");
        assert!(trace.events.is_empty());
        assert_eq!(trace.summary.format, None);
        assert_eq!(trace.end_time, 0);
    }
}
