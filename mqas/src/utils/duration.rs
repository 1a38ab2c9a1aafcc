//! Compact duration strings such as `"1w2d3h4m5s"`.

use regex::Regex;
use std::sync::LazyLock;
use std::time::Duration;

static DURATION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:(\d+)w)?(?:(\d+)d)?(?:(\d+)h)?(?:(\d+)m)?(?:(\d+)s)?$")
        .unwrap_or_else(|e| unreachable!("duration pattern is valid: {e}"))
});

const UNIT_SECONDS: [u64; 5] = [7 * 24 * 3600, 24 * 3600, 3600, 60, 1];

/// Parses plain seconds (`"90"`, `"2.5"`) or a compact duration.
///
/// Units must appear in `w d h m s` order; any subset is allowed. Returns
/// `None` for an empty string, a negative number or anything else.
#[must_use]
pub fn parse_duration(text: &str) -> Option<Duration> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    if let Ok(seconds) = text.parse::<f64>() {
        return Duration::try_from_secs_f64(seconds).ok();
    }

    let caps = DURATION_RE.captures(text)?;
    let mut total: u64 = 0;
    for (idx, unit) in UNIT_SECONDS.iter().enumerate() {
        if let Some(m) = caps.get(idx + 1) {
            let n: u64 = m.as_str().parse().ok()?;
            total = total.checked_add(n.checked_mul(*unit)?)?;
        }
    }
    Some(Duration::from_secs(total))
}
