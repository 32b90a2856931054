//! Making user- and model-supplied text safe for Telegram's markup dialects.

/// Telegram `parse_mode` a piece of text is interpolated into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    /// Legacy `Markdown` mode.
    Markdown,
    Html,
}

impl Dialect {
    /// Value of the `parse_mode` field for this dialect.
    #[must_use]
    pub fn parse_mode(self) -> &'static str {
        match self {
            Dialect::Markdown => "Markdown",
            Dialect::Html => "HTML",
        }
    }
}

/// Escape `text` so it renders literally in an HTML-mode message.
#[must_use]
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}

/// Text for the inside of a legacy Markdown `*bold*` entity.
///
/// Telegram does not accept escapes inside an entity and ends it at the first `*`, so
/// that character is swapped for a look-alike. Everything else renders as written.
#[must_use]
pub fn markdown_bold_text(text: &str) -> String {
    text.replace('*', "\u{2217}")
}

/// Link label for legacy Markdown: `]` would close the label early, so it becomes `)`.
#[must_use]
pub fn markdown_link_label(text: &str) -> String {
    text.replace(']', ")")
}
