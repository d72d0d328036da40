//! Formatting helpers shared across UIs.

use chrono::{DateTime, Utc};

/// Format a timestamp as relative time (e.g., "2m ago").
pub fn format_relative_time(ts: DateTime<Utc>) -> String {
    format_relative_time_from(ts, Utc::now())
}

/// Format `ts` relative to `now`.
pub fn format_relative_time_from(ts: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let duration = now.signed_duration_since(ts);

    if duration.num_seconds() < 0 {
        "just now".to_string()
    } else if duration.num_seconds() < 60 {
        format!("{}s ago", duration.num_seconds())
    } else if duration.num_minutes() < 60 {
        format!("{}m ago", duration.num_minutes())
    } else if duration.num_hours() < 24 {
        format!("{}h ago", duration.num_hours())
    } else if duration.num_days() < 7 {
        format!("{}d ago", duration.num_days())
    } else {
        ts.format("%b %d").to_string()
    }
}

/// Rewrite `=== Heading ===` lines into level-2 markdown headings.
///
/// The bot marks report sections this way; everything else passes through.
pub fn render_markup(text: &str) -> String {
    text.lines()
        .map(|line| match heading(line) {
            Some(title) => format!("## {}", title),
            None => line.to_string(),
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn heading(line: &str) -> Option<&str> {
    let inner = line
        .trim()
        .strip_prefix("===")?
        .strip_suffix("===")?
        .trim();
    (!inner.is_empty()).then_some(inner)
}

/// First `max_chars` characters of `text`, never splitting a character.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_relative_time() {
        let now = Utc::now();
        assert_eq!(format_relative_time_from(now + Duration::seconds(5), now), "just now");
        assert_eq!(format_relative_time_from(now - Duration::seconds(30), now), "30s ago");
        assert_eq!(format_relative_time_from(now - Duration::minutes(5), now), "5m ago");
        assert_eq!(format_relative_time_from(now - Duration::hours(3), now), "3h ago");
        assert_eq!(format_relative_time_from(now - Duration::days(2), now), "2d ago");
    }

    #[test]
    fn test_render_markup_headings() {
        let text = "=== ANALYSE MÉDICALE TERMINÉE ===\nRésultat: asthme probable\n  ===Conseils===  ";
        assert_eq!(
            render_markup(text),
            "## ANALYSE MÉDICALE TERMINÉE\nRésultat: asthme probable\n## Conseils"
        );
    }

    #[test]
    fn test_render_markup_leaves_plain_text() {
        assert_eq!(render_markup("a == b"), "a == b");
        assert_eq!(render_markup("======"), "======");
    }

    #[test]
    fn test_truncate_chars_respects_char_boundaries() {
        assert_eq!(truncate_chars("éééé", 2), "éé");
        assert_eq!(truncate_chars("abc", 10), "abc");
    }
}
