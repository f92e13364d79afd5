//! Tokenizer for card markup: prose interleaved with LaTeX-style formulas.
//!
//! Grammar, tried in order at every token boundary (first match wins):
//!
//! 1. `\n` or `\r\n` -> [`TokenKind::Newline`]
//! 2. `$$...$$` or `\[...\]` -> [`TokenKind::BlockFormula`]
//! 3. `\(...\)` or `$...$` -> [`TokenKind::InlineFormula`]
//! 4. a run of non-whitespace plus its trailing horizontal whitespace -> [`TokenKind::Word`];
//!    horizontal whitespace with no word in front of it -> [`TokenKind::Space`]
//!
//! Formula tokens also swallow trailing horizontal whitespace, like words do; the layout engine
//! replaces that whitespace with its configured inline gap.
//!
//! `$` only opens inline math when it is followed by a non-space, non-digit character, and only
//! closes it when the closing `$` is not escaped, not preceded by whitespace and not followed by a
//! digit. This keeps prices such as `$5 and $10` as plain words.
//!
//! Formulas are recognized at token boundaries only, so `a$b$` stays a single word. Unterminated
//! or empty delimiters are not errors: the opening run is emitted as a literal word and scanning
//! continues after it.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenKind {
    Word,
    Space,
    Newline,
    InlineFormula,
    BlockFormula,
}

impl TokenKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenKind::Word => "word",
            TokenKind::Space => "space",
            TokenKind::Newline => "newline",
            TokenKind::InlineFormula => "inline_formula",
            TokenKind::BlockFormula => "block_formula",
        }
    }

    pub fn is_formula(&self) -> bool {
        matches!(self, TokenKind::InlineFormula | TokenKind::BlockFormula)
    }
}

/// A slice of the source markup. `text` is always the exact source span, so concatenating the
/// texts of every token reproduces the input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Token<'a> {
    pub kind: TokenKind,
    pub text: &'a str,
}

impl<'a> Token<'a> {
    pub fn new(kind: TokenKind, text: &'a str) -> Self {
        Self { kind, text }
    }

    /// Formula markup with its delimiters but without swallowed trailing whitespace.
    ///
    /// For non-formula tokens this is the token text unchanged.
    pub fn markup(&self) -> &'a str {
        if self.kind.is_formula() {
            self.text.trim_end()
        } else {
            self.text
        }
    }

    /// The formula source between its delimiters, or `None` for prose tokens.
    pub fn formula_body(&self) -> Option<&'a str> {
        let markup = self.markup();
        let pairs: &[(&str, &str)] = match self.kind {
            TokenKind::BlockFormula => &[("$$", "$$"), ("\\[", "\\]")],
            TokenKind::InlineFormula => &[("\\(", "\\)"), ("$", "$")],
            _ => return None,
        };
        pairs.iter().find_map(|(open, close)| {
            markup
                .strip_prefix(open)
                .and_then(|rest| rest.strip_suffix(close))
        })
    }
}

pub fn tokenize(text: &str) -> Tokens<'_> {
    Tokens { src: text, pos: 0 }
}

/// Lazy token stream over a markup string. A clone continues independently from the same
/// position; call [`tokenize`] again to start over.
#[derive(Debug, Clone)]
pub struct Tokens<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> Iterator for Tokens<'a> {
    type Item = Token<'a>;

    fn next(&mut self) -> Option<Token<'a>> {
        let rest = &self.src[self.pos..];
        let first = rest.chars().next()?;
        let (kind, len) = scan_token(rest, first);
        self.pos += len;
        Some(Token::new(kind, &rest[..len]))
    }
}

impl std::iter::FusedIterator for Tokens<'_> {}

fn scan_token(rest: &str, first: char) -> (TokenKind, usize) {
    if rest.starts_with("\r\n") {
        return (TokenKind::Newline, 2);
    }
    if first == '\n' {
        return (TokenKind::Newline, 1);
    }
    if let Some(len) = scan_block_formula(rest) {
        let len = len + horizontal_space_len(&rest[len..]);
        return (TokenKind::BlockFormula, len);
    }
    if let Some(len) = scan_inline_formula(rest) {
        let len = len + horizontal_space_len(&rest[len..]);
        return (TokenKind::InlineFormula, len);
    }
    if first.is_whitespace() {
        // Only horizontal whitespace can reach this point, and at least `first` qualifies.
        let len = horizontal_space_len(rest).max(first.len_utf8());
        return (TokenKind::Space, len);
    }
    let word_len = rest.find(char::is_whitespace).unwrap_or(rest.len());
    let len = word_len + horizontal_space_len(&rest[word_len..]);
    (TokenKind::Word, len)
}

fn scan_block_formula(rest: &str) -> Option<usize> {
    for (open, close) in [("$$", "$$"), ("\\[", "\\]")] {
        let Some(after) = rest.strip_prefix(open) else {
            continue;
        };
        let Some(end) = after.find(close) else {
            return None;
        };
        if after[..end].trim().is_empty() {
            return None;
        }
        return Some(open.len() + end + close.len());
    }
    None
}

fn scan_inline_formula(rest: &str) -> Option<usize> {
    if let Some(after) = rest.strip_prefix("\\(") {
        let end = after.find("\\)")?;
        let body = &after[..end];
        if body.contains('\n') || body.trim().is_empty() {
            return None;
        }
        return Some(2 + end + 2);
    }

    if rest.starts_with("$$") {
        return None;
    }
    let after = rest.strip_prefix('$')?;
    let opener = after.chars().next()?;
    if opener.is_whitespace() || opener.is_ascii_digit() {
        return None;
    }

    // `$` and `\n` are ASCII, so byte offsets found here are always char boundaries.
    let bytes = after.as_bytes();
    for (i, &b) in bytes.iter().enumerate() {
        match b {
            b'\n' => return None,
            b'$' if i > 0 => {
                let prev = bytes[i - 1];
                if prev == b'\\' || prev.is_ascii_whitespace() {
                    continue;
                }
                if bytes.get(i + 1).is_some_and(|next| next.is_ascii_digit()) {
                    continue;
                }
                return Some(1 + i + 1);
            }
            _ => {}
        }
    }
    None
}

/// Length of the leading horizontal whitespace. Stops before `\n` and before a `\r\n` pair; a
/// lone `\r` counts as horizontal.
fn horizontal_space_len(s: &str) -> usize {
    for (i, ch) in s.char_indices() {
        let stop = match ch {
            '\n' => true,
            '\r' => s[i + 1..].starts_with('\n'),
            c => !c.is_whitespace(),
        };
        if stop {
            return i;
        }
    }
    s.len()
}

#[cfg(test)]
mod tests;
