//! Whole-string wildcard patterns for text filters.
//!
//! `*` matches any run (including empty), `?` matches one character and
//! every other character is literal. A backslash escapes the wildcard that
//! follows it:
//! - `\\*` is a literal backslash followed by a `*` wildcard
//! - `\*` is a literal asterisk
//!
//! `\\*` is recognized before `\*` at each position. A backslash that does
//! not introduce one of those two sequences is itself literal.

use regex::{Regex, RegexBuilder};

use crate::error::FilterError;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Literal(char),
    AnyRun,
    AnyOne,
}

fn tokenize(pattern: &str) -> Vec<Token> {
    let chars: Vec<char> = pattern.chars().collect();
    let mut tokens = Vec::with_capacity(chars.len());
    let mut i = 0;

    while i < chars.len() {
        match chars[i] {
            '\\' if chars.get(i + 1) == Some(&'\\') && chars.get(i + 2) == Some(&'*') => {
                tokens.push(Token::Literal('\\'));
                tokens.push(Token::AnyRun);
                i += 3;
            }
            '\\' if chars.get(i + 1) == Some(&'*') => {
                tokens.push(Token::Literal('*'));
                i += 2;
            }
            '*' => {
                tokens.push(Token::AnyRun);
                i += 1;
            }
            '?' => {
                tokens.push(Token::AnyOne);
                i += 1;
            }
            c => {
                tokens.push(Token::Literal(c));
                i += 1;
            }
        }
    }

    tokens
}

/// A compiled wildcard pattern.
#[derive(Debug, Clone)]
pub struct Glob {
    regex: Regex,
}

impl Glob {
    pub fn new(pattern: &str, case_insensitive: bool) -> Result<Self, FilterError> {
        let mut source = String::from("^");
        let mut buf = [0u8; 4];
        for token in tokenize(pattern) {
            match token {
                Token::Literal(c) => source.push_str(&regex::escape(c.encode_utf8(&mut buf))),
                Token::AnyRun => source.push_str(".*"),
                Token::AnyOne => source.push('.'),
            }
        }
        source.push('$');

        let regex = RegexBuilder::new(&source)
            .case_insensitive(case_insensitive)
            .dot_matches_new_line(true)
            .build()
            .map_err(|e| FilterError::InvalidPattern {
                pattern: pattern.to_string(),
                reason: e.to_string(),
            })?;

        Ok(Self { regex })
    }

    pub fn is_match(&self, value: &str) -> bool {
        self.regex.is_match(value)
    }
}
