mod append;
mod backup;
mod chain;
mod codec;
mod edit;
mod error;
mod index;
mod paths;
mod schema;
mod store;

pub use append::append_records;
pub use backup::BackupManager;
pub use chain::{check_chain, ChainReport, DanglingParent, DuplicateId};
pub use codec::{decode_line, encode_line, encode_message, is_json_line, LogEntry, LogView, SkippedLine};
pub use edit::{delete_first, delete_last, delete_lines, max_deletable_head, truncate};
pub use error::{RecordParseError, SessionStoreError};
pub use index::{
    JsonSessionIndex, SessionIndex, SessionSummary, TokenClamp, AGENT_KEY_PREFIX,
    DEFAULT_CONTEXT_TOKENS, TOKENS_PER_LINE_ESTIMATE,
};
pub use paths::{
    agent_home, backup_dir, backup_file_name, index_path, session_file_name, session_path,
    session_root,
};
pub use schema::{
    format_timestamp, parse_timestamp, ContentPart, MessageBody, MessageRecord, OtherRecord,
    Record, Role, TextPart, TextPartType, MESSAGE_TYPE,
};
pub use store::{RewriteReport, SessionLog};
