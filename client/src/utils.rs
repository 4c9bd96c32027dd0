/// Format seconds into MM:SS or HH:MM:SS, with a leading minus for
/// negative values.
pub fn format_time(seconds: f64) -> String {
    let sign = if seconds < 0.0 { "-" } else { "" };
    let total_secs = seconds.abs().round() as u64;
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let secs = total_secs % 60;

    if hours > 0 {
        format!("{sign}{:02}:{:02}:{:02}", hours, minutes, secs)
    } else {
        format!("{sign}{:02}:{:02}", minutes, secs)
    }
}

/// Parse `SS`, `MM:SS` or `HH:MM:SS` (fractional seconds allowed) into
/// seconds.
pub fn parse_time(input: &str) -> Option<f64> {
    let input = input.trim();
    if input.is_empty() {
        return None;
    }
    let parts: Vec<&str> = input.split(':').collect();
    if parts.len() > 3 {
        return None;
    }
    let mut total = 0.0;
    for (index, part) in parts.iter().enumerate() {
        let value: f64 = part.parse().ok()?;
        let is_last = index + 1 == parts.len();
        if value < 0.0 || (!is_last && value.fract() != 0.0) {
            return None;
        }
        total = total * 60.0 + value;
    }
    Some(total)
}
