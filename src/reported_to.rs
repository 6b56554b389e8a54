//! C10 — the `reported_to` journal.
//!
//! An append-only list of `KEY=value ...` lines, one per place a problem
//! was reported to. Entries are de-duplicated by exact line equality and
//! the most recent entry with a given prefix wins when looking one up.

pub(crate) const ITEM_NAME: &str = "reported_to";

/// A parsed journal entry: the two keys this crate recognises. `MSG=`
/// consumes the rest of the line, so it must be the last recognised
/// token on any given line.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ReportedToRecord {
    pub url: Option<String>,
    pub msg: Option<String>,
}

/// Computes the new journal content after appending `line`, or `None` if
/// `line` is already present verbatim and nothing needs to change.
pub(crate) fn append_line(existing: &str, line: &str) -> Option<String> {
    if contains_line(existing, line) {
        return None;
    }

    let mut out = existing.to_owned();
    if !out.is_empty() && !out.ends_with('\n') {
        out.push('\n');
    }
    out.push_str(line);
    out.push('\n');
    Some(out)
}

fn contains_line(journal: &str, line: &str) -> bool {
    journal.lines().any(|existing| existing == line)
}

/// Scans the journal for the last line starting with `prefix` and parses
/// the remainder as whitespace-separated `KEY=value` tokens.
pub(crate) fn find_by_prefix(journal: &str, prefix: &str) -> Option<ReportedToRecord> {
    let last_match = journal.lines().filter(|l| l.starts_with(prefix)).last()?;
    let rest = &last_match[prefix.len()..];
    Some(parse_record(rest))
}

fn parse_record(rest: &str) -> ReportedToRecord {
    let mut record = ReportedToRecord::default();
    let mut remaining = rest.trim_start();
    while !remaining.is_empty() {
        if let Some(msg) = remaining.strip_prefix("MSG=") {
            record.msg = Some(msg.to_owned());
            break;
        }
        let (token, rest) = match remaining.split_once(char::is_whitespace) {
            Some((t, r)) => (t, r.trim_start()),
            None => (remaining, ""),
        };
        if let Some(url) = token.strip_prefix("URL=") {
            record.url = Some(url.to_owned());
        }
        remaining = rest;
    }
    record
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_is_idempotent_on_exact_line() {
        let v1 = append_line("", "URL=http://x/1").unwrap();
        assert_eq!(v1, "URL=http://x/1\n");
        assert!(append_line(&v1, "URL=http://x/1").is_none());
    }

    #[test]
    fn append_adds_separating_newline() {
        let v1 = append_line("", "URL=http://x/1").unwrap();
        let v2 = append_line(&v1, "URL=http://x/2").unwrap();
        assert_eq!(v2, "URL=http://x/1\nURL=http://x/2\n");
    }

    #[test]
    fn find_returns_last_match() {
        let journal = "URL=http://x/1\nURL=http://x/2\n";
        let record = find_by_prefix(journal, "URL=").unwrap();
        assert_eq!(record.url, Some("http://x/2".to_owned()));
        assert_eq!(record.msg, None);
    }

    #[test]
    fn find_parses_msg_to_end_of_line() {
        let journal = "reporter: URL=http://x/1 MSG=uploaded ok\n";
        let record = find_by_prefix(journal, "reporter: ").unwrap();
        assert_eq!(record.url, Some("http://x/1".to_owned()));
        assert_eq!(record.msg, Some("uploaded ok".to_owned()));
    }

    #[test]
    fn find_returns_none_without_a_match() {
        assert!(find_by_prefix("URL=http://x/1\n", "BUGZILLA=").is_none());
    }
}
