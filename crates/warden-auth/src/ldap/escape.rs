//! Search filter escaping (RFC 4515)

/// Escape special LDAP characters in a string for use in search filters.
///
/// `*`, `(`, `)`, `\` and NUL become `\2A`, `\28`, `\29`, `\5C` and `\00`;
/// everything else passes through unchanged.
pub fn escape_filter(input: &str) -> String {
    let mut escaped = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '*' => escaped.push_str("\\2A"),
            '(' => escaped.push_str("\\28"),
            ')' => escaped.push_str("\\29"),
            '\\' => escaped.push_str("\\5C"),
            '\0' => escaped.push_str("\\00"),
            _ => escaped.push(c),
        }
    }
    escaped
}

/// Escape raw bytes for use in search filters.
///
/// Valid UTF-8 is escaped like [`escape_filter`]. Anything else is rendered
/// entirely as `\xx` hex escapes, one per byte.
pub fn escape_filter_bytes(input: &[u8]) -> String {
    match std::str::from_utf8(input) {
        Ok(s) => escape_filter(s),
        Err(_) => input.iter().map(|b| format!("\\{:02x}", b)).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_specials() {
        assert_eq!(escape_filter("*"), "\\2A");
        assert_eq!(escape_filter("(abc*123)"), "\\28abc\\2A123\\29");
        assert_eq!(escape_filter("a\\b"), "a\\5Cb");
        assert_eq!(escape_filter("nul\0"), "nul\\00");
    }

    #[test]
    fn test_escape_passthrough() {
        assert_eq!(escape_filter("abc123"), "abc123");
        assert_eq!(escape_filter("çé=,+"), "çé=,+");
        assert_eq!(escape_filter(""), "");
        assert_eq!(escape_filter_bytes(b""), "");
    }

    #[test]
    fn test_escape_utf8_bytes() {
        assert_eq!(escape_filter_bytes(b"ab\xc3\xa7123"), "abç123");
        assert_eq!(escape_filter_bytes(b"abc*"), "abc\\2A");
    }

    #[test]
    fn test_escape_invalid_utf8_bytes() {
        assert_eq!(escape_filter_bytes(b"ab\xe7123"), "\\61\\62\\e7\\31\\32\\33");
        // no partial decode, even for escapable characters
        assert_eq!(escape_filter_bytes(b"*\xff"), "\\2a\\ff");
    }
}
