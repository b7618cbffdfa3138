// Shallow SQL lexer
//
// Produces tokens with byte spans into the original text so callers can splice the query
// without re-rendering it. Quoted text, quoted identifiers, dollar-quoted bodies and
// comments are single tokens, which is what makes keyword and parenthesis tracking safe.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum LexError {
    #[error("Unterminated string literal starting at byte {0}")]
    UnterminatedString(usize),

    #[error("Unterminated quoted identifier starting at byte {0}")]
    UnterminatedIdentifier(usize),

    #[error("Unterminated block comment starting at byte {0}")]
    UnterminatedComment(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Word,
    QuotedIdent,
    StringLit,
    Number,
    /// `:name` style named parameter
    NamedParam,
    /// `$1` style positional parameter
    PositionalParam,
    LParen,
    RParen,
    Comma,
    Dot,
    Semicolon,
    Operator,
    Comment,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub start: usize,
    pub end: usize,
    /// Parenthesis depth at which the token appears (0 = top level)
    pub depth: usize,
}

impl Token {
    pub fn text<'a>(&self, src: &'a str) -> &'a str {
        &src[self.start..self.end]
    }

    /// Case-insensitive keyword test; only bare words can be keywords
    pub fn is_keyword(&self, src: &str, keyword: &str) -> bool {
        self.kind == TokenKind::Word && self.text(src).eq_ignore_ascii_case(keyword)
    }

    pub fn is_top_level(&self) -> bool {
        self.depth == 0
    }
}

pub fn tokenize(src: &str) -> Result<Vec<Token>, LexError> {
    let bytes = src.as_bytes();
    let mut tokens = Vec::new();
    let mut depth = 0usize;
    let mut i = 0usize;

    while i < bytes.len() {
        let c = bytes[i];
        let start = i;

        if c.is_ascii_whitespace() {
            i += 1;
            continue;
        }

        let kind = match c {
            b'-' if bytes.get(i + 1) == Some(&b'-') => {
                while i < bytes.len() && bytes[i] != b'\n' {
                    i += 1;
                }
                TokenKind::Comment
            }
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                i = find_from(src, i + 2, "*/").ok_or(LexError::UnterminatedComment(start))? + 2;
                TokenKind::Comment
            }
            b'\'' => {
                i = scan_quoted(bytes, i, b'\'', false).ok_or(LexError::UnterminatedString(start))?;
                TokenKind::StringLit
            }
            b'"' => {
                i = scan_quoted(bytes, i, b'"', false).ok_or(LexError::UnterminatedIdentifier(start))?;
                TokenKind::QuotedIdent
            }
            b'$' => {
                if let Some(end) = scan_dollar_quoted(src, i) {
                    i = end;
                    TokenKind::StringLit
                } else if bytes.get(i + 1).is_some_and(u8::is_ascii_digit) {
                    i += 1;
                    while i < bytes.len() && bytes[i].is_ascii_digit() {
                        i += 1;
                    }
                    TokenKind::PositionalParam
                } else {
                    i += 1;
                    TokenKind::Operator
                }
            }
            b':' => {
                let prev_colon = i > 0 && bytes[i - 1] == b':';
                let next = bytes.get(i + 1).copied();
                if !prev_colon && next.is_some_and(is_ident_start) {
                    i += 1;
                    while i < bytes.len() && is_ident_char(bytes[i]) {
                        i += 1;
                    }
                    TokenKind::NamedParam
                } else if next == Some(b':') {
                    i += 2;
                    TokenKind::Operator
                } else {
                    i += 1;
                    TokenKind::Operator
                }
            }
            b'(' => {
                i += 1;
                tokens.push(Token { kind: TokenKind::LParen, start, end: i, depth });
                depth += 1;
                continue;
            }
            b')' => {
                i += 1;
                depth = depth.saturating_sub(1);
                tokens.push(Token { kind: TokenKind::RParen, start, end: i, depth });
                continue;
            }
            b',' => {
                i += 1;
                TokenKind::Comma
            }
            b';' => {
                i += 1;
                TokenKind::Semicolon
            }
            b'.' if !bytes.get(i + 1).is_some_and(u8::is_ascii_digit) => {
                i += 1;
                TokenKind::Dot
            }
            b'0'..=b'9' | b'.' => {
                i = scan_number(bytes, i);
                TokenKind::Number
            }
            c if is_ident_start(c) => {
                // E'...' escape strings allow backslash escapes
                if (c == b'e' || c == b'E') && bytes.get(i + 1) == Some(&b'\'') {
                    i = scan_quoted(bytes, i + 1, b'\'', true).ok_or(LexError::UnterminatedString(start))?;
                    TokenKind::StringLit
                } else {
                    while i < bytes.len() && is_ident_char(bytes[i]) {
                        i += 1;
                    }
                    TokenKind::Word
                }
            }
            _ => {
                // Multi-byte characters stay whole so spans remain on char boundaries
                i += utf8_width(c);
                TokenKind::Operator
            }
        };

        tokens.push(Token { kind, start, end: i, depth });
    }

    Ok(tokens)
}

/// Tokens without comments, the form every structural helper works on
pub fn significant_tokens(src: &str) -> Result<Vec<Token>, LexError> {
    Ok(tokenize(src)?
        .into_iter()
        .filter(|t| t.kind != TokenKind::Comment)
        .collect())
}

fn is_ident_start(c: u8) -> bool {
    c.is_ascii_alphabetic() || c == b'_' || c >= 0x80
}

fn is_ident_char(c: u8) -> bool {
    c.is_ascii_alphanumeric() || c == b'_' || c == b'$' || c >= 0x80
}

fn utf8_width(first: u8) -> usize {
    match first {
        0xF0..=0xFF => 4,
        0xE0..=0xEF => 3,
        0xC0..=0xDF => 2,
        _ => 1,
    }
}

fn find_from(src: &str, from: usize, needle: &str) -> Option<usize> {
    src.get(from..)?.find(needle).map(|pos| from + pos)
}

/// Returns the index just past the closing quote; doubled quotes are escapes
fn scan_quoted(bytes: &[u8], open: usize, quote: u8, backslash_escapes: bool) -> Option<usize> {
    let mut i = open + 1;
    while i < bytes.len() {
        let c = bytes[i];
        if backslash_escapes && c == b'\\' {
            i += 2;
            continue;
        }
        if c == quote {
            if bytes.get(i + 1) == Some(&quote) {
                i += 2;
                continue;
            }
            return Some(i + 1);
        }
        i += 1;
    }
    None
}

/// `$tag$ ... $tag$` bodies; returns None when `$` does not open one
fn scan_dollar_quoted(src: &str, open: usize) -> Option<usize> {
    let bytes = src.as_bytes();
    let mut i = open + 1;
    while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_') {
        i += 1;
    }
    if bytes.get(i) != Some(&b'$') {
        return None;
    }
    let tag = &src[open..=i];
    // A bare tag made of digits is a positional parameter, not a quote
    if tag[1..tag.len() - 1].bytes().next().is_some_and(|b| b.is_ascii_digit()) {
        return None;
    }
    let close = find_from(src, i + 1, tag)?;
    Some(close + tag.len())
}

fn scan_number(bytes: &[u8], mut i: usize) -> usize {
    while i < bytes.len() && (bytes[i].is_ascii_digit() || bytes[i] == b'.') {
        i += 1;
    }
    if i < bytes.len() && (bytes[i] == b'e' || bytes[i] == b'E') {
        let mut j = i + 1;
        if j < bytes.len() && (bytes[j] == b'+' || bytes[j] == b'-') {
            j += 1;
        }
        if j < bytes.len() && bytes[j].is_ascii_digit() {
            i = j;
            while i < bytes.len() && bytes[i].is_ascii_digit() {
                i += 1;
            }
        }
    }
    i
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<(TokenKind, String, usize)> {
        tokenize(src)
            .unwrap()
            .into_iter()
            .map(|t| (t.kind, t.text(src).to_string(), t.depth))
            .collect()
    }

    #[test]
    fn string_literals_are_single_tokens() {
        let src = "SELECT 'it''s ( WHERE' FROM t";
        let toks = kinds(src);
        assert_eq!(toks[1], (TokenKind::StringLit, "'it''s ( WHERE'".to_string(), 0));
        assert_eq!(toks.len(), 4);
    }

    #[test]
    fn tracks_parenthesis_depth() {
        let src = "SELECT * FROM (SELECT id FROM t ORDER BY id) s ORDER BY 1";
        let toks = tokenize(src).unwrap();
        let orders: Vec<usize> = toks
            .iter()
            .filter(|t| t.is_keyword(src, "ORDER"))
            .map(|t| t.depth)
            .collect();
        assert_eq!(orders, vec![1, 0]);
    }

    #[test]
    fn named_params_and_casts() {
        let toks = kinds("WHERE id = :id AND created::date = :day");
        let params: Vec<_> = toks
            .iter()
            .filter(|(k, _, _)| *k == TokenKind::NamedParam)
            .map(|(_, t, _)| t.as_str())
            .collect();
        assert_eq!(params, vec![":id", ":day"]);
    }

    #[test]
    fn dollar_quotes_and_positional_params() {
        let toks = kinds("SELECT $body$ don't ) $body$, $1");
        assert_eq!(toks[1].0, TokenKind::StringLit);
        assert_eq!(toks[3], (TokenKind::PositionalParam, "$1".to_string(), 0));
    }

    #[test]
    fn comments_are_tokens() {
        let src = "SELECT 1 -- trailing\n/* block */ FROM t";
        let comments = tokenize(src)
            .unwrap()
            .into_iter()
            .filter(|t| t.kind == TokenKind::Comment)
            .count();
        assert_eq!(comments, 2);
        assert_eq!(significant_tokens(src).unwrap().len(), 4);
    }

    #[test]
    fn unterminated_input_is_an_error() {
        assert_eq!(tokenize("SELECT 'oops"), Err(LexError::UnterminatedString(7)));
        assert!(matches!(tokenize("SELECT /* x"), Err(LexError::UnterminatedComment(_))));
    }

    #[test]
    fn escape_strings_honor_backslashes() {
        let toks = kinds(r"SELECT E'a\'b' FROM t");
        assert_eq!(toks[1].1, r"E'a\'b'");
        assert_eq!(toks.len(), 4);
    }
}
