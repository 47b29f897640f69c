use std::borrow::Cow;

/// Escapes a string value for inlining between single quotes in MySQL.
///
/// Handles backslash, backspace, newline, carriage return, tab, `\x1A`, NUL and both quote
/// characters. Returns the input unchanged when nothing needs escaping.
pub fn escape_sql(value: &str) -> Cow<'_, str> {
    if !value.chars().any(needs_escape) {
        return Cow::Borrowed(value);
    }

    let mut escaped = String::with_capacity(value.len() + 8);
    for c in value.chars() {
        match c {
            '\\' => escaped.push_str("\\\\"),
            '\u{8}' => escaped.push_str("\\b"),
            '\n' => escaped.push_str("\\n"),
            '\r' => escaped.push_str("\\r"),
            '\t' => escaped.push_str("\\t"),
            '\u{1A}' => escaped.push_str("\\Z"),
            '\0' => escaped.push_str("\\0"),
            '\'' => escaped.push_str("\\'"),
            '"' => escaped.push_str("\\\""),
            other => escaped.push(other),
        }
    }

    Cow::Owned(escaped)
}

fn needs_escape(c: char) -> bool {
    matches!(
        c,
        '\\' | '\u{8}' | '\n' | '\r' | '\t' | '\u{1A}' | '\0' | '\'' | '"'
    )
}

/// Appends `value` enclosed in single quotes, escaped when `escape` is set.
pub fn push_quoted(buffer: &mut String, value: &str, escape: bool) {
    buffer.push('\'');
    if escape {
        buffer.push_str(&escape_sql(value));
    } else {
        buffer.push_str(value);
    }
    buffer.push('\'');
}
