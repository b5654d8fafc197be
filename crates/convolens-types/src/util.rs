use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, SecondsFormat, Utc};

/// Collapse all whitespace runs into single spaces.
pub fn squash_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Whitespace-collapsed snippet truncated to `limit` characters.
pub fn snippet(text: &str, limit: usize) -> String {
    squash_whitespace(text).chars().take(limit).collect()
}

/// Parse an ISO-8601 timestamp, accepting a trailing `Z`, an explicit
/// offset, or a naive timestamp/date (interpreted as UTC).
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let text = value.trim();
    if text.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(naive.and_utc());
    }
    if let Ok(date) = NaiveDate::parse_from_str(text, "%Y-%m-%d") {
        return Some(date.and_hms_opt(0, 0, 0)?.and_utc());
    }
    None
}

/// Parse a YYYY-MM-DD date.
pub fn parse_date(value: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d").ok()
}

/// ISO week label (`YYYY-Www`) for a timestamp; falls back to the current
/// week when the timestamp is empty or unparseable.
pub fn week_label(value: &str) -> String {
    let dt = parse_timestamp(value).unwrap_or_else(Utc::now);
    let week = dt.iso_week();
    format!("{}-W{:02}", week.year(), week.week())
}

/// Current UTC timestamp in ISO-8601 format.
pub fn now_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false)
}

pub fn today() -> NaiveDate {
    Utc::now().date_naive()
}

/// ISO date prefix (`YYYY-MM-DD`) of a timestamp string.
pub fn date_prefix(created_at: &str) -> &str {
    created_at.get(..10).unwrap_or(created_at)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snippet_collapses_and_truncates() {
        assert_eq!(snippet("  a\n b\t\tc  ", 200), "a b c");
        assert_eq!(snippet("abcdef", 3), "abc");
        // Truncation counts characters, not bytes.
        assert_eq!(snippet("机制诊断报告", 2), "机制");
    }

    #[test]
    fn parses_z_suffix_and_offset() {
        let a = parse_timestamp("2026-02-06T10:00:00Z").unwrap();
        let b = parse_timestamp("2026-02-06T10:00:00+00:00").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn parses_naive_timestamp_as_utc() {
        let dt = parse_timestamp("2026-02-06T10:00:00").unwrap();
        assert_eq!(dt.to_rfc3339(), "2026-02-06T10:00:00+00:00");
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_timestamp("").is_none());
        assert!(parse_timestamp("not-a-date").is_none());
    }

    #[test]
    fn week_label_uses_iso_week() {
        assert_eq!(week_label("2026-02-06T10:00:00Z"), "2026-W06");
        // ISO week years can differ from calendar years at the boundary.
        assert_eq!(week_label("2027-01-01T00:00:00Z"), "2026-W53");
    }

    #[test]
    fn date_prefix_is_bounded() {
        assert_eq!(date_prefix("2026-02-06T10:00:00Z"), "2026-02-06");
        assert_eq!(date_prefix("short"), "short");
    }
}
