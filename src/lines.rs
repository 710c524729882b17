use std::borrow::Cow;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LineEndingStyle {
    Lf,
    Crlf,
    Cr,
}

pub fn detect_line_ending_style(text: &str) -> LineEndingStyle {
    if text.contains("\r\n") {
        LineEndingStyle::Crlf
    } else if text.contains('\r') {
        LineEndingStyle::Cr
    } else {
        LineEndingStyle::Lf
    }
}

pub fn normalize_to_lf(text: &str) -> Cow<'_, str> {
    if !text.contains('\r') {
        return Cow::Borrowed(text);
    }
    let mut normalized = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    while let Some(ch) = chars.next() {
        match ch {
            '\r' => {
                if matches!(chars.peek(), Some('\n')) {
                    chars.next();
                }
                normalized.push('\n');
            }
            _ => normalized.push(ch),
        }
    }
    Cow::Owned(normalized)
}

pub fn restore_from_lf(text: String, style: LineEndingStyle) -> String {
    match style {
        LineEndingStyle::Lf => text,
        LineEndingStyle::Crlf => text.replace('\n', "\r\n"),
        LineEndingStyle::Cr => text.replace('\n', "\r"),
    }
}

// Every element keeps its own trailing '\n' except possibly the last.
pub fn split_lines_inclusive(text: &str) -> Vec<&str> {
    if text.is_empty() {
        return Vec::new();
    }
    text.split_inclusive('\n').collect()
}
