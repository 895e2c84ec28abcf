/// Normalizes a North American number to E.164.
///
/// Accepts 10 digits, 11 digits with a leading `1`, or any `+`-prefixed
/// number with at least 10 digits. Formatting characters are ignored.
pub fn normalize_e164(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    let digits: String = trimmed.chars().filter(char::is_ascii_digit).collect();

    match digits.len() {
        10 => Some(format!("+1{digits}")),
        11 if digits.starts_with('1') => Some(format!("+{digits}")),
        len if trimmed.starts_with('+') && len >= 10 => Some(format!("+{digits}")),
        _ => None,
    }
}
