//
// Copyright (c) 2025-2026 Jeff Garzik
//
// This file is part of the posixutils-rs project covered under
// the MIT License.  For the full license text, please see the LICENSE
// file in the root directory of this project.
// SPDX-License-Identifier: MIT
//

//! Include / exclude masks over archive member names
//!
//! Glob syntax follows POSIX shell patterns:
//! - `*` matches any run of characters other than `/`
//! - `?` matches one character other than `/`
//! - `[...]`, `[!...]` match a character class
//! - `\x` matches `x` literally
//!
//! A pattern containing `/` is matched against the whole member name and
//! each of its leading directory prefixes. A pattern without `/` is
//! matched against each path component, so `*.o` excludes `src/main.o`.

use crate::error::{TarError, TarResult};

#[derive(Debug, Clone)]
enum Token {
    Char(char),
    Any,
    Star,
    Class { negated: bool, items: Vec<(char, char)> },
}

/// A compiled glob pattern
#[derive(Debug, Clone)]
pub struct Pattern {
    source: String,
    tokens: Vec<Token>,
    case_sensitive: bool,
    has_slash: bool,
}

fn parse_class(chars: &mut std::iter::Peekable<std::str::Chars>) -> TarResult<Token> {
    let negated = matches!(chars.peek(), Some('!') | Some('^'));
    if negated {
        chars.next();
    }

    let mut items = Vec::new();
    // ']' right after the opening bracket is literal
    if chars.peek() == Some(&']') {
        chars.next();
        items.push((']', ']'));
    }

    while let Some(c) = chars.next() {
        if c == ']' {
            return Ok(Token::Class { negated, items });
        }
        if chars.peek() == Some(&'-') {
            chars.next();
            match chars.peek().copied() {
                Some(end) if end != ']' => {
                    chars.next();
                    items.push((c, end));
                }
                _ => {
                    items.push((c, c));
                    items.push(('-', '-'));
                }
            }
        } else {
            items.push((c, c));
        }
    }

    Err(TarError::Pattern("unclosed bracket".to_string()))
}

impl Pattern {
    pub fn new(pattern: &str, case_sensitive: bool) -> TarResult<Self> {
        // "dir/" names the same thing as "dir"
        let body = match pattern.trim_end_matches('/') {
            "" => pattern,
            trimmed => trimmed,
        };
        let mut tokens = Vec::new();
        let mut chars = body.chars().peekable();
        while let Some(c) = chars.next() {
            tokens.push(match c {
                '*' => Token::Star,
                '?' => Token::Any,
                '[' => parse_class(&mut chars)?,
                '\\' => Token::Char(chars.next().unwrap_or('\\')),
                _ => Token::Char(c),
            });
        }
        // Collapse runs of stars
        tokens.dedup_by(|a, b| matches!((a, b), (Token::Star, Token::Star)));

        Ok(Pattern {
            source: pattern.to_string(),
            tokens,
            case_sensitive,
            has_slash: body.contains('/'),
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    fn fold(&self, c: char) -> char {
        if self.case_sensitive {
            c
        } else {
            c.to_lowercase().next().unwrap_or(c)
        }
    }

    fn class_has(&self, negated: bool, items: &[(char, char)], c: char) -> bool {
        let c = self.fold(c);
        let hit = items
            .iter()
            .any(|&(lo, hi)| (self.fold(lo)..=self.fold(hi)).contains(&c));
        hit != negated
    }

    fn match_from(&self, tokens: &[Token], text: &[char]) -> bool {
        let Some((first, rest)) = tokens.split_first() else {
            return text.is_empty();
        };
        match first {
            Token::Star => {
                for skip in 0..=text.len() {
                    if self.match_from(rest, &text[skip..]) {
                        return true;
                    }
                    if skip < text.len() && text[skip] == '/' {
                        break;
                    }
                }
                false
            }
            Token::Any => match text.split_first() {
                Some((&c, tail)) if c != '/' => self.match_from(rest, tail),
                _ => false,
            },
            Token::Char(p) => match text.split_first() {
                Some((&c, tail)) if self.fold(c) == self.fold(*p) => self.match_from(rest, tail),
                _ => false,
            },
            Token::Class { negated, items } => match text.split_first() {
                Some((&c, tail)) if self.class_has(*negated, items, c) => {
                    self.match_from(rest, tail)
                }
                _ => false,
            },
        }
    }

    /// Whole-string match
    pub fn matches(&self, text: &str) -> bool {
        let chars: Vec<char> = text.chars().collect();
        self.match_from(&self.tokens, &chars)
    }

    /// Match a member name, its leading prefixes, or (for patterns
    /// without a slash) any single component.
    pub fn matches_path(&self, name: &str) -> bool {
        let name = name.trim_end_matches('/');
        if self.has_slash {
            name.match_indices('/')
                .map(|(i, _)| &name[..i])
                .chain(std::iter::once(name))
                .any(|prefix| self.matches(prefix))
        } else {
            name.split('/').any(|component| self.matches(component))
        }
    }
}

/// A set of patterns sharing one case-sensitivity setting
#[derive(Debug, Clone, Default)]
pub struct Mask {
    patterns: Vec<Pattern>,
    case_sensitive: bool,
}

impl Mask {
    pub fn new(case_sensitive: bool) -> Self {
        Mask {
            patterns: Vec::new(),
            case_sensitive,
        }
    }

    pub fn from_patterns<I, T>(patterns: I, case_sensitive: bool) -> TarResult<Self>
    where
        I: IntoIterator<Item = T>,
        T: AsRef<str>,
    {
        let mut mask = Mask::new(case_sensitive);
        for p in patterns {
            mask.add(p.as_ref())?;
        }
        Ok(mask)
    }

    pub fn add(&mut self, pattern: &str) -> TarResult<()> {
        self.patterns.push(Pattern::new(pattern, self.case_sensitive)?);
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// True if any pattern matches `name` or one of its prefixes
    pub fn matches(&self, name: &str) -> bool {
        self.patterns.iter().any(|p| p.matches_path(name))
    }

    /// Include-mask check: an empty mask includes everything
    pub fn includes(&self, name: &str) -> bool {
        self.is_empty() || self.matches(name)
    }
}
