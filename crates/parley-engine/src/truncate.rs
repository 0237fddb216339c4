/// Ceiling for tool-result previews attached to displayed tool uses.
pub const PREVIEW_MAX_CHARS: usize = 500;

/// Largest char boundary at or below `index`.
pub fn floor_char_boundary(s: &str, index: usize) -> usize {
    if index >= s.len() {
        return s.len();
    }
    let mut i = index;
    while !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

/// Keep the head and tail of `text`, eliding the middle, so the kept text is
/// at most `max_chars` characters plus the marker.
pub fn truncate_middle(text: &str, max_chars: usize) -> String {
    let total = text.chars().count();
    if total <= max_chars {
        return text.to_string();
    }
    let head_chars = max_chars / 2;
    let tail_chars = max_chars - head_chars;
    let head: String = text.chars().take(head_chars).collect();
    let tail: String = text.chars().skip(total - tail_chars).collect();
    format!(
        "{head}\n\n[... {} characters omitted ...]\n\n{tail}",
        total - max_chars
    )
}

/// First `max_chars` characters, ending in `…` when cut.
pub fn preview(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max_chars.saturating_sub(1)).collect();
    out.push('…');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_text_untouched() {
        assert_eq!(truncate_middle("hello", 10), "hello");
        assert_eq!(preview("hello", 10), "hello");
    }

    #[test]
    fn middle_is_elided() {
        let text = format!("{}{}{}", "a".repeat(100), "b".repeat(1000), "c".repeat(100));
        let out = truncate_middle(&text, 200);
        assert!(out.starts_with(&"a".repeat(100)));
        assert!(out.ends_with(&"c".repeat(100)));
        assert!(out.contains("[... 1000 characters omitted ...]"));
        assert!(!out.contains('b'));
    }

    #[test]
    fn multibyte_safe() {
        let text = "🦀".repeat(50);
        let out = truncate_middle(&text, 10);
        assert!(out.starts_with(&"🦀".repeat(5)));
        let p = preview(&text, 10);
        assert_eq!(p.chars().count(), 10);
        assert!(p.ends_with('…'));
    }

    #[test]
    fn char_boundary_floor() {
        let s = "aé";
        assert_eq!(floor_char_boundary(s, 2), 1);
        assert_eq!(floor_char_boundary(s, 3), 3);
        assert_eq!(floor_char_boundary(s, 99), 3);
    }
}
