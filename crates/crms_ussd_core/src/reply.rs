//! crates/crms_ussd_core/src/reply.rs
//!
//! The two reply kinds the gateway understands. `CON` keeps the USSD leg open
//! and asks for another keystroke; `END` closes it.

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UssdReply {
    Continue(String),
    End(String),
}

impl UssdReply {
    pub fn prompt(text: impl Into<String>) -> Self {
        UssdReply::Continue(text.into())
    }

    pub fn end(text: impl Into<String>) -> Self {
        UssdReply::End(text.into())
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, UssdReply::End(_))
    }

    pub fn text(&self) -> &str {
        match self {
            UssdReply::Continue(text) | UssdReply::End(text) => text,
        }
    }
}

impl fmt::Display for UssdReply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UssdReply::Continue(text) => write!(f, "CON {}", text),
            UssdReply::End(text) => write!(f, "END {}", text),
        }
    }
}
