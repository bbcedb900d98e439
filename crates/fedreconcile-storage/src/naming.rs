//! File name hygiene for names supplied by clients and the validation service

// Leaves room for the ".part" staging suffix under NAME_MAX
const MAX_NAME_LEN: usize = 240;

/// Reduce an untrusted name to a single safe path component
///
/// Directory parts are dropped, control characters removed and leading dots
/// stripped. Falls back to `fallback` when nothing usable remains.
pub fn sanitize_file_name(raw: &str, fallback: &str) -> String {
    let last = raw.rsplit(['/', '\\']).next().unwrap_or_default();

    let cleaned: String = last
        .chars()
        .filter(|c| !c.is_control())
        .collect::<String>()
        .trim()
        .trim_start_matches('.')
        .to_string();

    let mut name = cleaned;
    while name.len() > MAX_NAME_LEN {
        name.pop();
    }

    if is_safe_file_name(&name) {
        name
    } else {
        fallback.to_string()
    }
}

/// True if `name` can be joined onto a lease directory without escaping it
pub fn is_safe_file_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= MAX_NAME_LEN
        && !name.starts_with('.')
        && !name.contains(['/', '\\', '\0'])
        && !name.chars().any(char::is_control)
}
