//! Running a filter over newline-delimited JSON events.
//!
//! A [`Stage`] wraps a [`Filter`] the way a host pipeline does: it decodes
//! each input line into an event, runs the filter, tags or drops events the
//! filter reported as failed, and re-encodes the result. Lines that are not
//! JSON objects pass through untouched.

use std::sync::atomic::{AtomicU64, Ordering};

use rayon::prelude::*;
use serde_json::Value;
use tracing::debug;

use crate::filter::{Event, Filter};

/// Event field holding the list of tags.
pub const TAGS_FIELD: &str = "tags";

/// What happened to one input line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The filter succeeded.
    Enriched,
    /// The filter reported failure; the event was tagged or dropped.
    Failed,
    /// The line was not a JSON object and was passed through.
    Invalid,
    /// The line was blank.
    Skipped,
}

/// Counters shared by all workers of a stage.
#[derive(Debug, Default)]
pub struct Stats {
    processed: AtomicU64,
    enriched: AtomicU64,
    failed: AtomicU64,
    invalid: AtomicU64,
}

/// Point-in-time copy of [`Stats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub processed: u64,
    pub enriched: u64,
    pub failed: u64,
    pub invalid: u64,
}

impl Stats {
    fn record(&self, outcome: Outcome) {
        let counter = match outcome {
            Outcome::Enriched => &self.enriched,
            Outcome::Failed => &self.failed,
            Outcome::Invalid => &self.invalid,
            Outcome::Skipped => return,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        self.processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            processed: self.processed.load(Ordering::Relaxed),
            enriched: self.enriched.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            invalid: self.invalid.load(Ordering::Relaxed),
        }
    }
}

/// A filter plus the host-side handling of its result.
#[derive(Debug)]
pub struct Stage<F> {
    filter: F,
    fail_tag: Option<String>,
    drop_failed: bool,
    stats: Stats,
}

impl<F: Filter> Stage<F> {
    pub fn new(filter: F) -> Self {
        Self {
            filter,
            fail_tag: None,
            drop_failed: false,
            stats: Stats::default(),
        }
    }

    /// Append `tag` to the `tags` field of events the filter fails on.
    #[must_use]
    pub fn with_fail_tag(mut self, tag: impl Into<String>) -> Self {
        self.fail_tag = Some(tag.into());
        self
    }

    /// Do not emit events the filter fails on.
    #[must_use]
    pub fn drop_failed(mut self, drop_failed: bool) -> Self {
        self.drop_failed = drop_failed;
        self
    }

    #[inline]
    pub fn filter(&self) -> &F {
        &self.filter
    }

    #[inline]
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Run the filter on one event and apply the fail tag if it failed.
    pub fn apply(&self, event: &mut Event) -> Outcome {
        let outcome = if self.filter.filter(event) {
            Outcome::Enriched
        } else {
            if let Some(tag) = &self.fail_tag {
                add_tag(event, tag);
            }
            Outcome::Failed
        };
        self.stats.record(outcome);
        outcome
    }

    /// Process one input line, appending the output line (if any) to `out`.
    ///
    /// # Errors
    ///
    /// Only fails if the event cannot be re-encoded.
    pub fn process_line(&self, line: &[u8], out: &mut Vec<u8>) -> serde_json::Result<Outcome> {
        let line = trim_line_end(line);
        if line.iter().all(u8::is_ascii_whitespace) {
            return Ok(Outcome::Skipped);
        }

        let mut event = match serde_json::from_slice::<Value>(line) {
            Ok(Value::Object(event)) => event,
            Ok(other) => {
                debug!(kind = json_kind(&other), "passing through non-object line");
                return Ok(self.pass_through(line, out));
            }
            Err(err) => {
                debug!(error = %err, "passing through line that is not JSON");
                return Ok(self.pass_through(line, out));
            }
        };

        let outcome = self.apply(&mut event);
        if outcome == Outcome::Failed && self.drop_failed {
            return Ok(outcome);
        }

        serde_json::to_writer(&mut *out, &event)?;
        out.push(b'\n');
        Ok(outcome)
    }

    /// Process a batch of lines across the current rayon pool.
    ///
    /// Output lines are appended to `out` in input order.
    pub fn process_batch(&self, lines: &[&[u8]], out: &mut Vec<u8>) -> serde_json::Result<()> {
        let encoded: Vec<serde_json::Result<Vec<u8>>> = lines
            .par_iter()
            .map(|line| {
                let mut buf = Vec::with_capacity(line.len() + 256);
                self.process_line(line, &mut buf)?;
                Ok(buf)
            })
            .collect();

        for buf in encoded {
            out.extend_from_slice(&buf?);
        }
        Ok(())
    }

    fn pass_through(&self, line: &[u8], out: &mut Vec<u8>) -> Outcome {
        out.extend_from_slice(line);
        out.push(b'\n');
        self.stats.record(Outcome::Invalid);
        Outcome::Invalid
    }
}

/// Append `tag` to the event's tag list, creating the list when missing.
///
/// A single string tag is promoted to a list. Tags already present are not
/// repeated.
pub fn add_tag(event: &mut Event, tag: &str) {
    let tags = event
        .entry(TAGS_FIELD)
        .or_insert_with(|| Value::Array(Vec::new()));

    if let Value::String(existing) = tags {
        let existing = std::mem::take(existing);
        *tags = Value::Array(vec![Value::String(existing)]);
    }

    match tags {
        Value::Array(list) => {
            if !list.iter().any(|t| t.as_str() == Some(tag)) {
                list.push(Value::String(tag.to_string()));
            }
        }
        other => debug!(kind = json_kind(other), "cannot tag event, tags is not a list"),
    }
}

fn trim_line_end(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    /// Succeeds when the event has `"ok": true`, and marks the events it saw.
    struct OkFilter;

    impl Filter for OkFilter {
        fn filter(&self, event: &mut Event) -> bool {
            if event.get("ok") == Some(&Value::Bool(true)) {
                event.insert("seen".to_string(), Value::Bool(true));
                true
            } else {
                false
            }
        }
    }

    fn run(stage: &Stage<OkFilter>, input: &str) -> String {
        let lines: Vec<&[u8]> = input.split_inclusive('\n').map(str::as_bytes).collect();
        let mut out = Vec::new();
        stage.process_batch(&lines, &mut out).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn enriched_and_failed_events() {
        let stage = Stage::new(OkFilter);
        let output = run(&stage, "{\"ok\":true}\n{\"ok\":false}\n");
        assert_eq!(output, "{\"ok\":true,\"seen\":true}\n{\"ok\":false}\n");
        assert_eq!(
            stage.stats(),
            StatsSnapshot {
                processed: 2,
                enriched: 1,
                failed: 1,
                invalid: 0
            }
        );
    }

    #[test]
    fn fail_tag_only_on_failure() {
        let stage = Stage::new(OkFilter).with_fail_tag("_geoipfailure");
        let output = run(&stage, "{\"ok\":true}\n{\"ok\":false,\"tags\":\"web\"}\n");
        assert_eq!(
            output,
            "{\"ok\":true,\"seen\":true}\n{\"ok\":false,\"tags\":[\"web\",\"_geoipfailure\"]}\n"
        );
    }

    #[test]
    fn drop_failed_events() {
        let stage = Stage::new(OkFilter).drop_failed(true);
        let output = run(&stage, "{\"ok\":false}\n{\"ok\":true}\n");
        assert_eq!(output, "{\"ok\":true,\"seen\":true}\n");
        assert_eq!(stage.stats().failed, 1);
    }

    #[test]
    fn non_objects_pass_through() {
        let stage = Stage::new(OkFilter);
        let output = run(&stage, "plain text\n[1,2]\n\n   \n{\"ok\":true}\r\n");
        assert_eq!(output, "plain text\n[1,2]\n{\"ok\":true,\"seen\":true}\n");
        assert_eq!(
            stage.stats(),
            StatsSnapshot {
                processed: 3,
                enriched: 1,
                failed: 0,
                invalid: 2
            }
        );
    }

    #[test]
    fn last_line_without_newline() {
        let stage = Stage::new(OkFilter);
        assert_eq!(run(&stage, "{\"ok\":true}"), "{\"ok\":true,\"seen\":true}\n");
    }

    #[test]
    fn batch_preserves_order() {
        let stage = Stage::new(OkFilter);
        let input: String = (0..500).map(|i| format!("{{\"n\":{i}}}\n")).collect();
        let output = run(&stage, &input);
        assert_eq!(output, input);
        assert_eq!(stage.stats().failed, 500);
    }

    #[test]
    fn add_tag_variants() {
        let mut event = Event::new();
        add_tag(&mut event, "a");
        add_tag(&mut event, "a");
        add_tag(&mut event, "b");
        assert_eq!(event[TAGS_FIELD], json!(["a", "b"]));

        let mut event = Event::new();
        event.insert(TAGS_FIELD.to_string(), json!("web"));
        add_tag(&mut event, "a");
        assert_eq!(event[TAGS_FIELD], json!(["web", "a"]));

        let mut event = Event::new();
        event.insert(TAGS_FIELD.to_string(), json!({"not": "a list"}));
        add_tag(&mut event, "a");
        assert_eq!(event[TAGS_FIELD], json!({"not": "a list"}));
    }
}
