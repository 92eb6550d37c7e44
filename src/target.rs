use std::sync::LazyLock;

use regex::Regex;

static TARGET_SHAPE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9.-]+$").expect("static target pattern"));

const SHELL_METACHARACTERS: &[char] = &[';', '&', '|'];

/// Check that a host name or IP address is safe to hand to the scan engine.
///
/// Two independent gates, both must pass:
/// - no `;`, `&` or `|` anywhere in the string
/// - the whole string is letters, digits, dots and hyphens
///
/// Only the character shape is checked; `999.1.1.1` passes, resolution is
/// left to the engine.
pub fn validate(target: &str) -> bool {
    if target.contains(SHELL_METACHARACTERS) {
        return false;
    }
    TARGET_SHAPE.is_match(target)
}
