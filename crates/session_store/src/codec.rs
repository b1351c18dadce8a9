use serde_json::{Map, Value};
use tracing::debug;

use crate::error::{RecordParseError, SessionStoreError};
use crate::schema::{MessageRecord, OtherRecord, Record, MESSAGE_TYPE};

/// Decodes one log line.
pub fn decode_line(line: &str) -> Result<Record, RecordParseError> {
    let value: Value = serde_json::from_str(line.trim()).map_err(RecordParseError::NotJson)?;
    let Value::Object(mut fields) = value else {
        return Err(RecordParseError::NotAnObject);
    };

    let is_message = match fields.get("type").and_then(Value::as_str) {
        Some(kind) => kind == MESSAGE_TYPE,
        None => return Err(RecordParseError::MissingType),
    };

    if !is_message {
        return Ok(Record::Other(OtherRecord { fields }));
    }

    fields.remove("type");
    serde_json::from_value::<MessageRecord>(Value::Object(fields))
        .map(Record::Message)
        .map_err(RecordParseError::InvalidMessage)
}

/// Encodes a record as a single JSON line without the terminating newline.
///
/// Compact JSON escapes control characters, so the result never spans lines.
pub fn encode_line(record: &Record) -> Result<String, serde_json::Error> {
    match record {
        Record::Message(message) => encode_message(message),
        Record::Other(other) => serde_json::to_string(&other.fields),
    }
}

pub fn encode_message(message: &MessageRecord) -> Result<String, serde_json::Error> {
    let mut fields = match serde_json::to_value(message)? {
        Value::Object(fields) => fields,
        _ => Map::new(),
    };
    fields.insert("type".to_string(), Value::String(MESSAGE_TYPE.to_string()));
    serde_json::to_string(&fields)
}

/// True when the line is a standalone JSON document.
#[must_use]
pub fn is_json_line(line: &str) -> bool {
    serde_json::from_str::<serde::de::IgnoredAny>(line).is_ok()
}

#[derive(Debug, Clone, PartialEq)]
pub struct LogEntry {
    /// 0-based physical line index.
    pub index: usize,
    pub raw: String,
    pub record: Option<Record>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedLine {
    pub index: usize,
    pub reason: String,
}

/// Parsed view over the physical lines of a session log.
///
/// Malformed lines keep their raw text and physical position but carry no
/// record; each one is listed in [`LogView::skipped`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LogView {
    entries: Vec<LogEntry>,
    skipped: Vec<SkippedLine>,
}

impl LogView {
    pub fn parse<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut entries = Vec::new();
        let mut skipped = Vec::new();

        for (index, raw) in lines.into_iter().enumerate() {
            let raw = raw.into();
            let record = match decode_line(&raw) {
                Ok(record) => Some(record),
                Err(error) => {
                    debug!(line = index + 1, reason = %error, "skipping undecodable log line");
                    skipped.push(SkippedLine {
                        index,
                        reason: error.to_string(),
                    });
                    None
                }
            };
            entries.push(LogEntry { index, raw, record });
        }

        Self { entries, skipped }
    }

    #[must_use]
    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    #[must_use]
    pub fn skipped(&self) -> &[SkippedLine] {
        &self.skipped
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn raw_lines(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|entry| entry.raw.as_str())
    }

    /// Message records with their physical index, in log order.
    pub fn messages(&self) -> impl DoubleEndedIterator<Item = (usize, &MessageRecord)> {
        self.entries.iter().filter_map(|entry| {
            entry
                .record
                .as_ref()
                .and_then(Record::as_message)
                .map(|message| (entry.index, message))
        })
    }

    /// Record at a 1-based line number.
    pub fn record_at(&self, line: usize) -> Result<&Record, SessionStoreError> {
        let entry = line
            .checked_sub(1)
            .and_then(|index| self.entries.get(index))
            .ok_or(SessionStoreError::InvalidLineNumber {
                line,
                len: self.entries.len(),
            })?;
        if let Some(record) = &entry.record {
            return Ok(record);
        }
        // Undecodable entries are re-decoded only to recover the reason.
        let source = decode_line(&entry.raw)
            .err()
            .unwrap_or(RecordParseError::NotAnObject);
        Err(SessionStoreError::RecordParse { line, source })
    }

    #[must_use]
    pub fn last_message_id(&self) -> Option<&str> {
        self.messages().next_back().map(|(_, message)| message.id.as_str())
    }

    #[must_use]
    pub fn first_message_index(&self) -> Option<usize> {
        self.messages().next().map(|(index, _)| index)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;
    use crate::schema::{ContentPart, Role};

    #[test]
    fn decode_line_reads_message_fields_and_text_parts() {
        let line = json!({
            "type": "message",
            "id": "m1",
            "parentId": "m0",
            "timestamp": "2026-02-14T00:00:01Z",
            "message": {
                "role": "assistant",
                "content": [
                    {"type": "image", "data": "AAAA", "mimeType": "image/png"},
                    {"type": "text", "text": "hello"}
                ],
                "usage": {"input": 12}
            }
        })
        .to_string();

        let record = decode_line(&line).expect("message line should decode");
        let message = record.as_message().expect("record should be a message");
        assert_eq!(message.id, "m1");
        assert_eq!(message.parent_id.as_deref(), Some("m0"));
        assert_eq!(message.role(), Role::Assistant);
        assert_eq!(message.first_text(), Some("hello"));
        assert!(matches!(message.message.content[0], ContentPart::Opaque(_)));
        assert_eq!(message.message.extra["usage"], json!({"input": 12}));
    }

    #[test]
    fn decode_line_passes_non_message_records_through() {
        let line = r#"{"type":"model_change","provider":"moonshot","id":"x"}"#;
        let record = decode_line(line).expect("other record should decode");
        assert_eq!(record.kind(), "model_change");
        assert!(record.as_message().is_none());
    }

    #[test]
    fn decode_line_rejects_malformed_shapes() {
        assert!(matches!(
            decode_line("{ nope"),
            Err(RecordParseError::NotJson(_))
        ));
        assert!(matches!(
            decode_line("[1,2]"),
            Err(RecordParseError::NotAnObject)
        ));
        assert!(matches!(
            decode_line(r#"{"id":"a"}"#),
            Err(RecordParseError::MissingType)
        ));
        assert!(matches!(
            decode_line(r#"{"type":"message","id":"a","message":{"role":"robot"}}"#),
            Err(RecordParseError::InvalidMessage(_))
        ));
    }

    #[test]
    fn encoded_message_redecodes_to_equal_record() {
        let line = json!({
            "type": "message",
            "id": "m1",
            "parentId": null,
            "timestamp": "2026-02-14T00:00:01.5Z",
            "summary": "marker",
            "message": {
                "role": "user",
                "content": [{"type": "text", "text": "line one\nline two \u{00e9}\u{767d}"}],
                "cost": 0.000123456789
            },
            "api": "openai-completions"
        })
        .to_string();

        let record = decode_line(&line).expect("line should decode");
        let encoded = encode_line(&record).expect("record should encode");
        assert!(!encoded.contains('\n'));
        assert_eq!(decode_line(&encoded).expect("re-decode"), record);
    }

    #[test]
    fn log_view_keeps_positions_and_counts_skips() {
        let view = LogView::parse(vec![
            r#"{"type":"session","id":"s"}"#.to_string(),
            "garbage".to_string(),
            json!({"type":"message","id":"a","message":{"role":"user","content":[]}}).to_string(),
            String::new(),
            json!({"type":"message","id":"b","message":{"role":"assistant","content":[]}})
                .to_string(),
        ]);

        assert_eq!(view.len(), 5);
        assert_eq!(
            view.skipped().iter().map(|s| s.index).collect::<Vec<_>>(),
            vec![1, 3]
        );
        assert_eq!(view.first_message_index(), Some(2));
        assert_eq!(view.last_message_id(), Some("b"));
    }
}
