//! Reply Value Types
//!
//! This module defines the value the [`crate::protocol::parser::ReplyParser`] produces for
//! one complete SSDB reply.
//!
//! ## Protocol Format
//!
//! A reply is a sequence of length-prefixed blocks terminated by a blank line:
//!
//! ```text
//! <size>\n<status>\n(<size>\n<data>\n)*\n
//! ```
//!
//! `status` is `ok` for success, or the error kind otherwise (`not_found`, `error`, `fail`,
//! `client_error`, ...). A success carries zero or more further data tokens.

use bytes::Bytes;

/// One data token inside a successful reply: raw bytes, or text if the connection was
/// configured with `decode_to_text`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    Bytes(Bytes),
    Text(String),
}

impl Token {
    /// Returns the token as text if it is UTF-8, regardless of how it was stored.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Token::Text(s) => Some(s.as_str()),
            Token::Bytes(b) => std::str::from_utf8(b).ok(),
        }
    }

    /// Returns the token's raw bytes.
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Token::Text(s) => s.as_bytes(),
            Token::Bytes(b) => b,
        }
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.as_str() {
            Some(s) => write!(f, "{}", s),
            None => write!(f, "(binary data, {} bytes)", self.as_bytes().len()),
        }
    }
}

use std::fmt;

/// The value of one complete, successful reply: an ordered, possibly-empty sequence of
/// data tokens.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Reply(pub Vec<Token>);

impl Reply {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Token> {
        self.0.iter()
    }

    /// Convenience accessor: the first token as text, if any.
    pub fn first_str(&self) -> Option<&str> {
        self.0.first().and_then(Token::as_str)
    }
}

impl IntoIterator for Reply {
    type Item = Token;
    type IntoIter = std::vec::IntoIter<Token>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}
