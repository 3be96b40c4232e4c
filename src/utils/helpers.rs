use chrono::NaiveDate;
use regex::Regex;
use std::sync::OnceLock;

fn markup_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"<[^>]*>").unwrap())
}

fn duration_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^PT(?:(\d+)H)?(?:(\d+)M)?(?:(\d+)S)?$").unwrap())
}

/// Collapse whitespace runs and drop null bytes so text is safe to persist.
pub fn clean_text(text: &str) -> String {
    let without_nulls = text.replace('\0', "");
    without_nulls.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Remove HTML-ish markup before normalizing whitespace.
pub fn strip_markup(text: &str) -> String {
    clean_text(&markup_re().replace_all(text, " "))
}

/// Parse an ISO 8601 `PT#H#M#S` duration into minutes. Unparseable input
/// yields zero rather than an error, matching how stat fields degrade.
pub fn parse_duration_minutes(duration: &str) -> f64 {
    let Some(caps) = duration_re().captures(duration) else {
        return 0.0;
    };
    let part = |idx: usize| -> u64 {
        caps.get(idx)
            .and_then(|m| m.as_str().parse::<u64>().ok())
            .unwrap_or(0)
    };
    let (hours, minutes, seconds) = (part(1), part(2), part(3));
    let total = hours as f64 * 60.0 + minutes as f64 + seconds as f64 / 60.0;
    (total * 100.0).round() / 100.0
}

/// Surrogate calendar key used by the star schema: YYYYMMDD as an integer.
pub fn date_to_id(date: NaiveDate) -> i64 {
    date.format("%Y%m%d").to_string().parse().unwrap_or(0)
}

/// Human-readable duration for run summaries.
pub fn format_duration(seconds: u64) -> String {
    if seconds < 60 {
        format!("{}s", seconds)
    } else if seconds < 3600 {
        format!("{}m {}s", seconds / 60, seconds % 60)
    } else {
        format!("{}h {}m", seconds / 3600, (seconds % 3600) / 60)
    }
}

/// Walk a nested JSON object by key path, returning None when any level is
/// missing or not an object.
pub fn safe_get<'a>(value: &'a serde_json::Value, keys: &[&str]) -> Option<&'a serde_json::Value> {
    let mut current = value;
    for key in keys {
        current = current.as_object()?.get(*key)?;
    }
    Some(current)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_text_collapses_whitespace() {
        assert_eq!(clean_text("  a\n\tb   c "), "a b c");
        assert_eq!(clean_text("nul\0byte"), "nulbyte");
        assert_eq!(clean_text(""), "");
    }

    #[test]
    fn test_strip_markup() {
        assert_eq!(strip_markup("<b>Hello</b> <i>world</i>"), "Hello world");
        assert_eq!(strip_markup("no tags"), "no tags");
    }

    #[test]
    fn test_parse_duration_minutes() {
        assert_eq!(parse_duration_minutes("PT1H30M15S"), 90.25);
        assert_eq!(parse_duration_minutes("PT4M13S"), 4.22);
        assert_eq!(parse_duration_minutes("PT45S"), 0.75);
        assert_eq!(parse_duration_minutes("not-a-duration"), 0.0);
        assert_eq!(parse_duration_minutes(""), 0.0);
    }

    #[test]
    fn test_date_to_id() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 7).unwrap();
        assert_eq!(date_to_id(date), 20240307);
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(42), "42s");
        assert_eq!(format_duration(125), "2m 5s");
        assert_eq!(format_duration(3720), "1h 2m");
    }

    #[test]
    fn test_safe_get() {
        let value = serde_json::json!({"snippet": {"title": "abc"}});
        assert_eq!(
            safe_get(&value, &["snippet", "title"]),
            Some(&serde_json::Value::String("abc".to_string()))
        );
        assert_eq!(safe_get(&value, &["snippet", "missing"]), None);
        assert_eq!(safe_get(&value, &["snippet", "title", "deeper"]), None);
    }
}
