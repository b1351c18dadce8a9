use crate::codec::{encode_message, LogView};
use crate::schema::MessageRecord;

/// Appends `records` after the last physical line of `view`.
///
/// The first new record without a parent is linked to the last message
/// already in the log; later ones without a parent chain to the record
/// appended just before them.
pub fn append_records(
    view: &LogView,
    records: Vec<MessageRecord>,
) -> Result<Vec<String>, serde_json::Error> {
    let mut lines: Vec<String> = view.raw_lines().map(str::to_string).collect();
    let mut previous_id = view.last_message_id().map(str::to_string);

    for mut record in records {
        if record.parent_id.is_none() {
            record.parent_id = previous_id.take();
        }
        lines.push(encode_message(&record)?);
        previous_id = Some(record.id);
    }

    Ok(lines)
}
