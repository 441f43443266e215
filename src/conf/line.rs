//! Line classification for `key: value` configuration files
//!
//! Every line of a server config file is either a setting (`key: value`, with
//! optional indentation, optional double quoting and an optional trailing
//! comment) or an opaque line that is carried through untouched.

use std::borrow::Cow;
use std::ops::Range;

/// One classified line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Line<'a> {
    /// Blank lines, comments, and anything without a usable `key:` prefix.
    Opaque(&'a str),
    Setting(Setting<'a>),
}

/// A `key: value` line, stored as spans into the original text so that a
/// rewrite only touches the value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Setting<'a> {
    raw: &'a str,
    key: Range<usize>,
    value: Range<usize>,
}

impl<'a> Line<'a> {
    /// Classify a single line (without its terminator).
    pub fn parse(raw: &'a str) -> Self {
        let body = raw.trim_start();
        if body.is_empty() || body.starts_with("//") || body.starts_with('#') {
            return Line::Opaque(raw);
        }
        let indent = raw.len() - body.len();

        let Some(colon) = body.find(':') else {
            return Line::Opaque(raw);
        };
        let key = body[..colon].trim_end();
        if key.is_empty() || key.contains(char::is_whitespace) {
            return Line::Opaque(raw);
        }

        let after_colon = indent + colon + 1;
        let rest = &raw[after_colon..];
        let value_start = after_colon + (rest.len() - rest.trim_start().len());
        let value_end = value_start + value_len(&raw[value_start..]);

        Line::Setting(Setting {
            raw,
            key: indent..indent + key.len(),
            value: value_start..value_end,
        })
    }

    /// The setting on this line if its key is exactly `key`.
    pub fn setting_for(&self, key: &str) -> Option<&Setting<'a>> {
        match self {
            Line::Setting(s) if s.key() == key => Some(s),
            _ => None,
        }
    }
}

impl<'a> Setting<'a> {
    pub fn key(&self) -> &'a str {
        &self.raw[self.key.clone()]
    }

    /// The value exactly as written, quotes included.
    pub fn value(&self) -> &'a str {
        &self.raw[self.value.clone()]
    }

    /// Whatever follows the value: whitespace, a `// comment`, a `,`.
    pub fn trailing(&self) -> &'a str {
        &self.raw[self.value.end..]
    }

    pub fn is_quoted(&self) -> bool {
        self.value().starts_with('"')
    }

    /// Render this line with `value` in place of the current value.
    ///
    /// A quoted value stays quoted and an unquoted one stays bare; every
    /// other byte of the line is kept.
    pub fn with_value(&self, value: &str) -> String {
        let mut prefix = self.raw[..self.value.start].to_string();
        let mut value = render(value, self.is_quoted());
        let trailing = self.trailing();
        if self.value.is_empty() {
            if !prefix.ends_with(char::is_whitespace) {
                prefix.push(' ');
            }
            if !trailing.is_empty() && !trailing.starts_with(char::is_whitespace) {
                value.push(' ');
            }
        }
        format!("{prefix}{value}{trailing}")
    }
}

/// `value` as it should appear after `key: `.
///
/// Quoted when asked for, and also when a bare value would not read back
/// the same: surrounding whitespace, a `//` comment marker, or a stray
/// leading quote.
pub fn render(value: &str, quoted: bool) -> String {
    let ambiguous = value != value.trim()
        || comment_start(value).is_some()
        || (value.starts_with('"') && !is_quoted_literal(value));
    if quoted || ambiguous {
        quote(value)
    } else {
        value.to_string()
    }
}

/// A complete double-quoted string: the closing quote is the last byte.
fn is_quoted_literal(value: &str) -> bool {
    quoted_len(value) == Some(value.len())
}

/// Wrap `value` in double quotes unless it already is a quoted string.
/// Backslashes and inner quotes are escaped.
pub fn quote(value: &str) -> String {
    if is_quoted_literal(value) {
        return value.to_string();
    }
    format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
}

/// Strip one pair of surrounding double quotes and undo `\\` and `\"`
/// escapes. Anything else is returned as is.
pub fn unquote(value: &str) -> Cow<'_, str> {
    if !is_quoted_literal(value) {
        return Cow::Borrowed(value);
    }
    let inner = &value[1..value.len() - 1];
    if !inner.contains('\\') {
        return Cow::Borrowed(inner);
    }
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some(next @ ('\\' | '"')) => out.push(next),
                Some(other) => {
                    out.push('\\');
                    out.push(other);
                }
                None => out.push('\\'),
            }
        } else {
            out.push(c);
        }
    }
    Cow::Owned(out)
}

/// Length of the value at the start of `s`.
fn value_len(s: &str) -> usize {
    if s.starts_with('"') {
        // unterminated: take the rest of the line
        return quoted_len(s).unwrap_or_else(|| s.trim_end().len());
    }

    let end = comment_start(s).unwrap_or(s.len());
    s[..end].trim_end().len()
}

/// Length of the quoted string at the start of `s`, closing quote included.
fn quoted_len(s: &str) -> Option<usize> {
    let inner = s.strip_prefix('"')?;
    let mut escaped = false;
    for (i, c) in inner.char_indices() {
        match c {
            '\\' if !escaped => escaped = true,
            '"' if !escaped => return Some(i + 2),
            _ => escaped = false,
        }
    }
    None
}

/// Offset of a `//` comment that follows whitespace (so `http://` is not one).
fn comment_start(s: &str) -> Option<usize> {
    let bytes = s.as_bytes();
    (0..bytes.len().saturating_sub(1)).find(|&i| {
        bytes[i] == b'/'
            && bytes[i + 1] == b'/'
            && (i == 0 || bytes[i - 1].is_ascii_whitespace())
    })
}
