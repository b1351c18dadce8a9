//! Pure line-editing transforms. Callers back up and rewrite the file.

use std::collections::BTreeSet;

use crate::codec::LogView;
use crate::error::SessionStoreError;

/// Removes the given 1-based line numbers, keeping the rest in order.
pub fn delete_lines(
    lines: &[String],
    line_numbers: &[usize],
) -> Result<Vec<String>, SessionStoreError> {
    let targets: BTreeSet<usize> = line_numbers.iter().copied().collect();
    if let Some(&bad) = targets
        .iter()
        .find(|&&line| line == 0 || line > lines.len())
    {
        return Err(SessionStoreError::InvalidLineNumber {
            line: bad,
            len: lines.len(),
        });
    }

    Ok(lines
        .iter()
        .enumerate()
        .filter(|(index, _)| !targets.contains(&(index + 1)))
        .map(|(_, line)| line.clone())
        .collect())
}

/// Drops the last `count` lines. The log must keep at least one line.
pub fn delete_last(lines: &[String], count: usize) -> Result<Vec<String>, SessionStoreError> {
    if count == 0 || lines.len() <= count {
        return Err(SessionStoreError::line_limit(
            "delete from the end",
            count,
            lines.len().saturating_sub(1),
        ));
    }

    Ok(lines[..lines.len() - count].to_vec())
}

/// Upper bound for [`delete_first`]: everything from the first message on,
/// minus the short-term records that must survive.
#[must_use]
pub fn max_deletable_head(view: &LogView, keep_tail: usize) -> usize {
    let first_message = view.first_message_index().unwrap_or(0);
    view.len()
        .saturating_sub(first_message)
        .saturating_sub(keep_tail)
}

/// Drops the first `count` lines, bounded by [`max_deletable_head`].
pub fn delete_first(
    view: &LogView,
    count: usize,
    keep_tail: usize,
) -> Result<Vec<String>, SessionStoreError> {
    let max = max_deletable_head(view, keep_tail);
    if count == 0 || count > max {
        return Err(SessionStoreError::line_limit(
            "delete from the start",
            count,
            max,
        ));
    }

    Ok(view.raw_lines().skip(count).map(str::to_string).collect())
}

/// Keeps the first `keep` lines. Returns `None` when nothing would change.
pub fn truncate(lines: &[String], keep: usize) -> Result<Option<Vec<String>>, SessionStoreError> {
    if keep == 0 {
        return Err(SessionStoreError::line_limit("truncate to", keep, lines.len()));
    }
    if lines.len() <= keep {
        return Ok(None);
    }

    Ok(Some(lines[..keep].to_vec()))
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn numbered(count: usize) -> Vec<String> {
        (1..=count)
            .map(|n| format!(r#"{{"type":"custom","n":{n}}}"#))
            .collect()
    }

    #[test]
    fn delete_lines_removes_exact_positions_in_order() {
        let lines = numbered(10);
        let kept = delete_lines(&lines, &[3, 7]).expect("valid line numbers");

        let expected: Vec<String> = [1, 2, 4, 5, 6, 8, 9, 10]
            .iter()
            .map(|n| lines[n - 1].clone())
            .collect();
        assert_eq!(kept, expected);
    }

    #[test]
    fn delete_lines_rejects_out_of_range() {
        let lines = numbered(3);
        assert!(matches!(
            delete_lines(&lines, &[0]),
            Err(SessionStoreError::InvalidLineNumber { line: 0, len: 3 })
        ));
        assert!(matches!(
            delete_lines(&lines, &[2, 4]),
            Err(SessionStoreError::InvalidLineNumber { line: 4, len: 3 })
        ));
    }

    #[test]
    fn delete_last_requires_more_lines_than_removed() {
        let lines = numbered(4);
        assert_eq!(delete_last(&lines, 3).expect("fits"), lines[..1].to_vec());
        assert!(matches!(
            delete_last(&lines, 4),
            Err(SessionStoreError::LineLimit { max: 3, .. })
        ));
    }

    #[test]
    fn delete_first_respects_short_term_tail() {
        let mut lines = vec![r#"{"type":"session","id":"s"}"#.to_string()];
        for n in 0..6 {
            lines.push(format!(
                r#"{{"type":"message","id":"m{n}","message":{{"role":"user","content":[]}}}}"#
            ));
        }
        let view = LogView::parse(lines.clone());

        // 7 lines, first message at index 1, keep 5 -> at most 1.
        assert_eq!(max_deletable_head(&view, 5), 1);
        assert_eq!(delete_first(&view, 1, 5).expect("fits"), lines[1..].to_vec());
        assert!(matches!(
            delete_first(&view, 2, 5),
            Err(SessionStoreError::LineLimit { max: 1, .. })
        ));
    }

    #[test]
    fn truncate_is_noop_when_short_enough() {
        let lines = numbered(5);
        assert_eq!(truncate(&lines, 5).expect("valid"), None);
        assert_eq!(
            truncate(&lines, 2).expect("valid"),
            Some(lines[..2].to_vec())
        );
    }
}
