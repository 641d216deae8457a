/// Turn an arbitrary identifier into a single NATS subject token.
///
/// Anything outside `[A-Za-z0-9_-]` (dots, wildcards, whitespace) is replaced
/// with `_`; an empty identifier becomes `unknown`.
pub fn subject_token(raw: &str) -> String {
    if raw.is_empty() {
        return "unknown".to_string();
    }

    raw.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}
