use std::collections::HashSet;

use crate::codec::LogView;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DanglingParent {
    /// 1-based line number.
    pub line: usize,
    pub id: String,
    pub parent_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DuplicateId {
    pub line: usize,
    pub id: String,
}

/// Parent-link health of a log's message chain.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChainReport {
    pub messages: usize,
    pub dangling: Vec<DanglingParent>,
    pub duplicates: Vec<DuplicateId>,
}

impl ChainReport {
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        self.dangling.is_empty() && self.duplicates.is_empty()
    }
}

/// Every message parent must name an earlier message id, except the first
/// message's, which may point at a record removed by truncation.
#[must_use]
pub fn check_chain(view: &LogView) -> ChainReport {
    let mut seen: HashSet<&str> = HashSet::new();
    let mut report = ChainReport::default();

    for (position, (index, message)) in view.messages().enumerate() {
        report.messages += 1;
        if let Some(parent_id) = message.parent_id.as_deref() {
            if position > 0 && !seen.contains(parent_id) {
                report.dangling.push(DanglingParent {
                    line: index + 1,
                    id: message.id.clone(),
                    parent_id: parent_id.to_string(),
                });
            }
        }
        if !seen.insert(message.id.as_str()) {
            report.duplicates.push(DuplicateId {
                line: index + 1,
                id: message.id.clone(),
            });
        }
    }

    report
}
