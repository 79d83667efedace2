/// Truncate a string to at most `max_chars` characters (not bytes),
/// appending "..." if truncated. Safe for all UTF-8 content.
pub fn truncate_chars(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max_chars).collect();
        format!("{truncated}...")
    }
}

/// Render a step or stage duration the way the run view shows it: `850ms`,
/// `12s`, `3m 05s`, `1h 02m`.
pub fn format_duration_millis(millis: u64) -> String {
    let secs = millis / 1000;
    if secs == 0 {
        format!("{millis}ms")
    } else if secs < 60 {
        format!("{secs}s")
    } else if secs < 3600 {
        format!("{}m {:02}s", secs / 60, secs % 60)
    } else {
        format!("{}h {:02}m", secs / 3600, (secs % 3600) / 60)
    }
}
