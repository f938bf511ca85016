//! Duration Strings
//!
//! Converts cooldown inputs like "30s", "5m" or "2h" to seconds and back.
//! Unparseable input is not an error: it reads as 0, meaning no cooldown.

/// Parse a duration string into seconds.
///
/// Accepts `<number><unit>` with an optional space before the unit
/// (`s`, `m` or `h`, any case), a bare number of seconds, or several unit
/// components separated by spaces as produced by [`format_duration`].
/// Anything else yields 0.
pub fn parse_duration(input: &str) -> u64 {
    let input = input.trim();
    if input.is_empty() {
        return 0;
    }

    if input.bytes().all(|b| b.is_ascii_digit()) {
        return input.parse().unwrap_or(0);
    }

    if let Some(secs) = parse_component(input) {
        return secs;
    }

    // "1h 30m 5s"
    let mut total: u64 = 0;
    for part in input.split_whitespace() {
        match parse_component(part).and_then(|secs| total.checked_add(secs)) {
            Some(sum) => total = sum,
            None => return 0,
        }
    }
    total
}

/// A single `<digits>[spaces]<unit>` component
fn parse_component(part: &str) -> Option<u64> {
    let mut chars = part.chars();
    let unit = chars.next_back()?;
    let multiplier = match unit.to_ascii_lowercase() {
        's' => 1,
        'm' => 60,
        'h' => 3600,
        _ => return None,
    };

    let digits = chars.as_str().trim_end();
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }

    digits.parse::<u64>().ok()?.checked_mul(multiplier)
}

/// Format seconds as `"1h 5m 3s"`, dropping zero components
pub fn format_duration(seconds: u64) -> String {
    let h = seconds / 3600;
    let m = (seconds % 3600) / 60;
    let s = seconds % 60;

    let mut parts = Vec::with_capacity(3);
    if h > 0 {
        parts.push(format!("{}h", h));
    }
    if m > 0 {
        parts.push(format!("{}m", m));
    }
    if s > 0 || parts.is_empty() {
        parts.push(format!("{}s", s));
    }
    parts.join(" ")
}
