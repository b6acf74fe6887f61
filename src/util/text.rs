use std::borrow::Cow;

fn is_stripped(c: char) -> bool {
    c.is_control() && c != '\t' && c != '\n' && c != '\r'
}

/// Strip control characters from feed-supplied text.
///
/// Tab, newline and carriage return are kept. Returns `Cow::Borrowed` when
/// nothing needs removing, which is the common case for titles and folder names.
pub fn strip_control_chars(s: &str) -> Cow<'_, str> {
    if !s.chars().any(is_stripped) {
        return Cow::Borrowed(s);
    }
    Cow::Owned(s.chars().filter(|c| !is_stripped(*c)).collect())
}

/// Collapse runs of whitespace into single spaces and trim the ends.
pub fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_clean_text_returns_borrowed() {
        let result = strip_control_chars("Hello, world!");
        assert!(matches!(result, Cow::Borrowed(_)));
        assert_eq!(result, "Hello, world!");
    }

    #[test]
    fn test_strip_preserves_tabs_newlines_cr() {
        assert_eq!(strip_control_chars("a\tb\nc\rd"), "a\tb\nc\rd");
    }

    #[test]
    fn test_strip_removes_controls() {
        assert_eq!(strip_control_chars("a\x00b\x07c\x1bd\x7fe"), "abcde");
    }

    #[test]
    fn test_strip_unicode_preserved() {
        assert_eq!(strip_control_chars("caf\u{e9} \u{4e16}\u{754c}"), "caf\u{e9} \u{4e16}\u{754c}");
    }

    #[test]
    fn test_collapse_whitespace() {
        assert_eq!(collapse_whitespace("  Daily \n\t political   briefing "), "Daily political briefing");
        assert_eq!(collapse_whitespace("   "), "");
    }
}
