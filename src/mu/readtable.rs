// Mu, the execution core of a small Lisp runtime.

// SPDX-FileCopyrightText: © 2024 Matthew Rothlisberger
// SPDX-License-Identifier: AGPL-3.0-only

// Mu is licensed under the terms of the GNU Affero General Public
// License version 3. See the top-level LICENSES directory for the
// license text.

// Find full copyright information in the top-level COPYRIGHT file.

// <>

// src/mu/readtable.rs

// Character classes for the reader.

// <>

/// How the reader treats a character
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyntaxType {
    Constituent,
    Whitespace,
    /// Starts a form: `"` `'` `(` `)` `;` and the like
    TMacro,
    /// Dispatches on the following character: `#`
    Macro,
    Escape,
    MEscape,
    /// Control characters that may not appear outside strings
    Illegal,
}

/// Characters with a specific meaning to the reader
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyntaxChar {
    DQuote,
    Sharp,
    BackQuote,
    LParen,
    RParen,
    Comma,
    Dot,
    Colon,
    Semicolon,
    Quote,
    Backslash,
    VBar,
}

pub fn syntax_type(ch: u8) -> SyntaxType {
    match ch {
        b' ' | b'\t' | b'\n' | b'\r' | 0x0b | 0x0c => SyntaxType::Whitespace,
        b'"' | b'\'' | b'(' | b')' | b',' | b';' | b'`' => SyntaxType::TMacro,
        b'#' => SyntaxType::Macro,
        b'\\' => SyntaxType::Escape,
        b'|' => SyntaxType::MEscape,
        0x21..=0x7e => SyntaxType::Constituent,
        // bytes of multibyte UTF-8 sequences
        0x80..=0xff => SyntaxType::Constituent,
        _ => SyntaxType::Illegal,
    }
}

pub fn syntax_char(ch: u8) -> Option<SyntaxChar> {
    Some(match ch {
        b'"' => SyntaxChar::DQuote,
        b'#' => SyntaxChar::Sharp,
        b'`' => SyntaxChar::BackQuote,
        b'(' => SyntaxChar::LParen,
        b')' => SyntaxChar::RParen,
        b',' => SyntaxChar::Comma,
        b'.' => SyntaxChar::Dot,
        b':' => SyntaxChar::Colon,
        b';' => SyntaxChar::Semicolon,
        b'\'' => SyntaxChar::Quote,
        b'\\' => SyntaxChar::Backslash,
        b'|' => SyntaxChar::VBar,
        _ => return None,
    })
}

pub fn is_constituent(ch: u8) -> bool {
    syntax_type(ch) == SyntaxType::Constituent
}

pub fn is_whitespace(ch: u8) -> bool {
    syntax_type(ch) == SyntaxType::Whitespace
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classes() {
        assert!(is_whitespace(b' '));
        assert!(is_whitespace(b'\n'));
        assert!(is_constituent(b'a'));
        assert!(is_constituent(b':'));
        assert!(is_constituent(b'.'));
        assert!(is_constituent(b'-'));
        assert!(!is_constituent(b'('));
        assert_eq!(syntax_type(b'#'), SyntaxType::Macro);
        assert_eq!(syntax_type(b'\\'), SyntaxType::Escape);
        assert_eq!(syntax_type(b'|'), SyntaxType::MEscape);
        assert_eq!(syntax_type(0x01), SyntaxType::Illegal);
        assert_eq!(syntax_char(b';'), Some(SyntaxChar::Semicolon));
        assert_eq!(syntax_char(b'a'), None);
    }
}
