//! Loading the session-keyed dialogue corpus.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;

/// One utterance of a dialogue session with its gold annotations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UtteranceRecord {
    pub session_id: String,
    pub utterance_id: String,
    pub role: String,
    /// Pre-split atomic tokens (characters for the Chinese corpus).
    pub tokens: Vec<String>,
    pub intents: Vec<String>,
    /// One BIO tag per token.
    pub tags: Vec<String>,
    #[serde(default)]
    pub action: Value,
}

#[derive(Debug, Deserialize)]
struct RawUtterance {
    uttr_id: Value,
    role: String,
    utterance: Vec<String>,
    #[serde(default)]
    intents: Vec<String>,
    #[serde(default)]
    tags: String,
    #[serde(default)]
    action: Value,
}

impl RawUtterance {
    fn into_record(self, session_id: &str) -> UtteranceRecord {
        let utterance_id = match self.uttr_id {
            Value::String(s) => s,
            other => other.to_string(),
        };

        UtteranceRecord {
            session_id: session_id.to_string(),
            utterance_id,
            role: self.role,
            tokens: self.utterance,
            intents: self.intents,
            tags: self.tags.split_whitespace().map(str::to_string).collect(),
            action: self.action,
        }
    }
}

/// Parse a JSON object mapping session id to its ordered utterances.
///
/// Records are returned flat, sessions in file order.
pub fn parse_records(json: &str) -> Result<Vec<UtteranceRecord>> {
    let sessions: serde_json::Map<String, Value> = serde_json::from_str(json)?;

    let mut records = Vec::new();
    for (session_id, utterances) in sessions {
        let utterances: Vec<RawUtterance> = serde_json::from_value(utterances)?;
        records.extend(utterances.into_iter().map(|u| u.into_record(&session_id)));
    }
    Ok(records)
}

/// Read and parse a training/evaluation data file.
pub fn load_records<P: AsRef<Path>>(path: P) -> Result<Vec<UtteranceRecord>> {
    let path = path.as_ref();
    let content = fs::read_to_string(path)?;
    let records = parse_records(&content)?;
    tracing::info!(path = %path.display(), records = records.len(), "read dialogue records");
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "7": [
            {"uttr_id": 0, "role": "usr", "utterance": ["我", "要", "去", "北京"],
             "intents": ["Inform"], "tags": "O O O B-loc", "action": [["Inform", "景点", "名称", "北京"]]},
            {"uttr_id": 1, "role": "sys", "utterance": ["好"], "intents": [], "tags": "O", "action": []}
        ],
        "2": [
            {"uttr_id": "a", "role": "usr", "utterance": [], "intents": ["greet"], "tags": ""}
        ]
    }"#;

    #[test]
    fn test_parse_records_flattens_in_file_order() {
        let records = parse_records(SAMPLE).unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].session_id, "7");
        assert_eq!(records[0].utterance_id, "0");
        assert_eq!(records[0].tags, vec!["O", "O", "O", "B-loc"]);
        assert_eq!(records[1].role, "sys");
        assert_eq!(records[2].session_id, "2");
        assert_eq!(records[2].utterance_id, "a");
        assert!(records[2].tags.is_empty());
        assert_eq!(records[2].action, Value::Null);
    }

    #[test]
    fn test_parse_records_rejects_malformed() {
        assert!(parse_records(r#"{"1": [{"role": "usr"}]}"#).is_err());
        assert!(parse_records("[]").is_err());
    }
}
