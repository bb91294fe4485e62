//! Batch-wide event schema normalization
//!
//! Event logs mix records of different shapes. Tabular consumers need every
//! row to carry the same keys, so a batch is reshaped in two passes:
//!
//! 1. collect the union of keys, in first-seen order;
//! 2. rebuild each record in union order with missing keys set to `null`,
//!    then inject `id` (1-based record position) and `count` (1, unless
//!    the record already carries one).
//!
//! The whole batch must be seen before the first record can be emitted, so
//! a batch is held in memory. `max_records` bounds it: when exceeded, the
//! oldest records are dropped and `id` still reflects each record's
//! original position.

use serde_json::{Map, Value};
use std::collections::HashSet;
use tracing::{debug, warn};

/// Parse newline-delimited JSON, keeping only lines that hold a JSON object.
/// Blank and malformed lines are skipped.
pub fn parse_ndjson(text: &str) -> Vec<Map<String, Value>> {
    let mut records = Vec::new();
    let mut skipped = 0usize;

    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<Value>(line) {
            Ok(Value::Object(map)) => records.push(map),
            Ok(_) | Err(_) => skipped += 1,
        }
    }

    if skipped > 0 {
        debug!("Skipped {} malformed NDJSON lines", skipped);
    }
    records
}

/// Two-pass key-union normalizer
#[derive(Debug, Clone)]
pub struct Normalizer {
    max_records: usize,
}

impl Normalizer {
    /// `max_records == 0` disables the bound
    pub fn new(max_records: usize) -> Self {
        Self { max_records }
    }

    pub fn max_records(&self) -> usize {
        self.max_records
    }

    /// Normalize a batch of records
    pub fn normalize(&self, mut records: Vec<Map<String, Value>>) -> Vec<Value> {
        let mut offset = 0usize;
        if self.max_records > 0 && records.len() > self.max_records {
            offset = records.len() - self.max_records;
            warn!(
                "Batch of {} records exceeds bound of {}, dropping the oldest {}",
                records.len(),
                self.max_records,
                offset
            );
            records.drain(..offset);
        }

        let keys = key_union(&records);

        records
            .into_iter()
            .enumerate()
            .map(|(idx, mut record)| {
                let mut row = Map::with_capacity(keys.len() + 2);
                for key in &keys {
                    let value = record.remove(key.as_str()).unwrap_or(Value::Null);
                    row.insert(key.clone(), value);
                }
                row.insert("id".to_string(), Value::from(offset + idx + 1));
                // A count carried by the record itself wins
                if row.get("count").map_or(true, Value::is_null) {
                    row.insert("count".to_string(), Value::from(1));
                }
                Value::Object(row)
            })
            .collect()
    }

    /// Parse and normalize NDJSON text in one step
    pub fn normalize_ndjson(&self, text: &str) -> Vec<Value> {
        self.normalize(parse_ndjson(text))
    }
}

impl Default for Normalizer {
    fn default() -> Self {
        Self::new(50_000)
    }
}

/// Pass 1: every key seen anywhere in the batch, first-seen order
fn key_union(records: &[Map<String, Value>]) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut keys = Vec::new();
    for record in records {
        for key in record.keys() {
            if seen.insert(key.as_str()) {
                keys.push(key.clone());
            }
        }
    }
    keys
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn objects(value: Value) -> Vec<Map<String, Value>> {
        value
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v.as_object().unwrap().clone())
            .collect()
    }

    #[test]
    fn test_backfills_union_with_nulls() {
        let normalizer = Normalizer::default();
        let out = normalizer.normalize(objects(json!([{"a": 1}, {"b": 2}])));

        let text = serde_json::to_string(&out).unwrap();
        assert_eq!(
            text,
            r#"[{"a":1,"b":null,"id":1,"count":1},{"a":null,"b":2,"id":2,"count":1}]"#
        );
    }

    #[test]
    fn test_uniform_batch_is_unchanged() {
        let normalizer = Normalizer::default();
        let input = json!([
            {"a": 1, "b": null, "id": 1, "count": 1},
            {"a": null, "b": 2, "id": 2, "count": 1}
        ]);

        let out = normalizer.normalize(objects(input.clone()));
        assert_eq!(Value::Array(out), input);
    }

    #[test]
    fn test_output_is_deterministic() {
        let normalizer = Normalizer::default();
        let text = "{\"x\":1,\"y\":[1,2]}\n{\"z\":\"q\",\"x\":2}\n";

        let first = serde_json::to_string(&normalizer.normalize_ndjson(text)).unwrap();
        let second = serde_json::to_string(&normalizer.normalize_ndjson(text)).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_malformed_lines_do_not_hide_neighbours() {
        let normalizer = Normalizer::default();
        let text = "{\"event_type\":\"connection\"}\n{broken json\n42\n\n{\"event_type\":\"command\",\"command\":\"ls\"}\n";

        let out = normalizer.normalize_ndjson(text);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0]["event_type"], "connection");
        assert_eq!(out[0]["command"], Value::Null);
        assert_eq!(out[1]["command"], "ls");
        assert_eq!(out[1]["id"], 2);
    }

    #[test]
    fn test_existing_count_is_kept() {
        let normalizer = Normalizer::default();
        let out = normalizer.normalize(objects(json!([
            {"event_type": "no_activity", "count": 0},
            {"event_type": "ftp_command"}
        ])));

        assert_eq!(out[0]["count"], 0);
        assert_eq!(out[1]["count"], 1);
        assert_eq!(out[1]["id"], 2);
    }

    #[test]
    fn test_key_set_drift_changes_shape() {
        let normalizer = Normalizer::default();
        let small = normalizer.normalize(objects(json!([{"a": 1}])));
        let wider = normalizer.normalize(objects(json!([{"a": 1}, {"c": 3}])));

        assert!(small[0].get("c").is_none());
        assert_eq!(wider[0]["c"], Value::Null);
    }

    #[test]
    fn test_bound_drops_oldest_and_keeps_positions() {
        let normalizer = Normalizer::new(2);
        let out = normalizer.normalize(objects(json!([{"n": 1}, {"n": 2}, {"n": 3}])));

        assert_eq!(out.len(), 2);
        assert_eq!(out[0]["n"], 2);
        assert_eq!(out[0]["id"], 2);
        assert_eq!(out[1]["id"], 3);
    }

    #[test]
    fn test_empty_batch() {
        let normalizer = Normalizer::default();
        assert!(normalizer.normalize(Vec::new()).is_empty());
        assert!(normalizer.normalize_ndjson("").is_empty());
    }
}
