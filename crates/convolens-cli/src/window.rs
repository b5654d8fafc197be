//! Window expressions and period identifiers.

use chrono::Duration;
use convolens_types::util::today;
use once_cell::sync::Lazy;
use regex::Regex;

static WINDOW_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(\d+)d$").unwrap());

/// Parse a window expression (`30d`, `all-time`) to a since-date string.
/// `None` means the window is open-ended.
pub fn parse_window_to_since(window: &str) -> Result<Option<String>, String> {
    let value = window.trim().to_lowercase();
    if matches!(value.as_str(), "" | "all" | "all-time") {
        return Ok(None);
    }

    let Some(captures) = WINDOW_PATTERN.captures(&value) else {
        return Err("window must be like '30d' or 'all-time'".to_string());
    };
    let days: i64 = captures[1]
        .parse()
        .map_err(|_| "window must be like '30d' or 'all-time'".to_string())?;
    if days <= 0 {
        return Err("window days must be positive".to_string());
    }

    Ok(Some((today() - Duration::days(days)).format("%Y-%m-%d").to_string()))
}

/// Resolve the effective since/until range. Explicit dates win; otherwise a
/// bounded window yields `since = today - N days, until = today`.
pub fn resolve_window(
    window: &str,
    since: Option<String>,
    until: Option<String>,
) -> Result<(Option<String>, Option<String>), String> {
    if since.is_some() || until.is_some() {
        return Ok((since, until));
    }

    let parsed_since = parse_window_to_since(window)?;
    let until = parsed_since
        .as_ref()
        .map(|_| today().format("%Y-%m-%d").to_string());
    Ok((parsed_since, until))
}

/// Deterministic period identifier for an aggregation window.
pub fn build_period_id(
    since: Option<&str>,
    until: Option<&str>,
    window: Option<&str>,
    explicit_period_id: Option<&str>,
) -> String {
    if let Some(explicit) = explicit_period_id {
        let trimmed = explicit.trim();
        if !trimmed.is_empty() {
            return trimmed.to_string();
        }
    }
    if since.is_some() || until.is_some() {
        return format!("{}_to_{}", since.unwrap_or("open"), until.unwrap_or("today"));
    }
    if let Some(window) = window {
        return format!("rolling_{}", window);
    }
    "rolling_30d".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_windows() {
        assert_eq!(parse_window_to_since("all-time").unwrap(), None);
        assert_eq!(parse_window_to_since("all").unwrap(), None);
        assert_eq!(parse_window_to_since("").unwrap(), None);
        assert_eq!(parse_window_to_since("ALL-TIME").unwrap(), None);
    }

    #[test]
    fn bounded_window_yields_date() {
        let since = parse_window_to_since("30d").unwrap().unwrap();
        assert_eq!(since, (today() - Duration::days(30)).format("%Y-%m-%d").to_string());
    }

    #[test]
    fn malformed_windows_are_rejected() {
        assert!(parse_window_to_since("30").is_err());
        assert!(parse_window_to_since("d30").is_err());
        assert!(parse_window_to_since("0d").is_err());
        assert!(parse_window_to_since("monthly").is_err());
    }

    #[test]
    fn explicit_dates_win_over_window() {
        let (since, until) =
            resolve_window("30d", Some("2026-01-01".to_string()), None).unwrap();
        assert_eq!(since.as_deref(), Some("2026-01-01"));
        assert_eq!(until, None);
    }

    #[test]
    fn open_window_resolves_to_open_range() {
        let (since, until) = resolve_window("all-time", None, None).unwrap();
        assert_eq!(since, None);
        assert_eq!(until, None);
    }

    #[test]
    fn period_id_precedence() {
        assert_eq!(build_period_id(None, None, Some("30d"), Some("custom")), "custom");
        assert_eq!(
            build_period_id(Some("2026-01-01"), Some("2026-01-31"), Some("30d"), None),
            "2026-01-01_to_2026-01-31"
        );
        assert_eq!(build_period_id(Some("2026-01-01"), None, None, None), "2026-01-01_to_today");
        assert_eq!(build_period_id(None, Some("2026-01-31"), None, None), "open_to_2026-01-31");
        assert_eq!(build_period_id(None, None, Some("all-time"), None), "rolling_all-time");
        assert_eq!(build_period_id(None, None, None, None), "rolling_30d");
        assert_eq!(build_period_id(None, None, Some("30d"), Some("  ")), "rolling_30d");
    }
}
