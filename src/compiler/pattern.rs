//! Wildcard label → anchored regular expression source.

/// Translates a definitions label into an anchored regex source.
///
/// `*` becomes `.*`, `?` becomes `.`, every other character is escaped.
/// Case-insensitivity is applied when the matcher builds the regex, not here.
pub fn wildcard_to_regex(label: &str) -> String {
    let mut pattern = String::with_capacity(label.len() * 2 + 2);
    let mut buf = [0u8; 4];

    pattern.push('^');
    for c in label.chars() {
        match c {
            '*' => pattern.push_str(".*"),
            '?' => pattern.push('.'),
            other => pattern.push_str(&regex::escape(other.encode_utf8(&mut buf))),
        }
    }
    pattern.push('$');

    pattern
}
