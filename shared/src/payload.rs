//! Text payload codec
//!
//! Commands travel as a single line of whitespace-delimited tokens:
//! ```text
//! <com_num> <want_return:0|1> <tok> <tok> ... [<key>=<value> ...]
//! ```
//! Named arguments are written `key=value`; the human-typed free-form
//! variant (`key=value, key2 = value2`) is normalized before tokenizing, so
//! the decoder only ever peeks one token ahead for a bare `=`.
//!
//! Decoding is total: any malformed line surfaces as a [`PayloadError`]
//! carrying the offending payload text, never a panic.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A decoded command invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandCall {
    pub com_num: u8,
    /// Whether the caller wants the return value or only an acknowledgement.
    pub want_return: bool,
    pub args: Vec<String>,
    pub kwargs: BTreeMap<String, String>,
}

impl CommandCall {
    /// A bare call with no arguments.
    pub fn bare(com_num: u8, want_return: bool) -> Self {
        Self {
            com_num,
            want_return,
            args: Vec::new(),
            kwargs: BTreeMap::new(),
        }
    }
}

/// A payload that could not be decoded, kept for diagnostics.
#[derive(Debug, Error)]
#[error("payload error ({payload}): {kind}")]
pub struct PayloadError {
    pub payload: String,
    #[source]
    pub kind: PayloadErrorKind,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PayloadErrorKind {
    #[error("missing command number")]
    MissingCommandNumber,

    #[error("bad command number: {0}")]
    BadCommandNumber(String),

    #[error("missing want-return flag")]
    MissingReturnFlag,

    #[error("bad want-return flag: {0}")]
    BadReturnFlag(String),

    #[error("named argument '{0}' has no value")]
    DanglingKey(String),
}

/// Encode a command invocation to its wire line.
pub fn encode(call: &CommandCall) -> String {
    let mut line = format!("{} {}", call.com_num, u8::from(call.want_return));

    for arg in &call.args {
        let _ = write!(line, " {arg}");
    }
    for (key, value) in &call.kwargs {
        let _ = write!(line, " {key}={value}");
    }

    line
}

/// Decode a wire line into a command invocation.
pub fn decode(line: &str) -> Result<CommandCall, PayloadError> {
    let err = |kind| PayloadError {
        payload: line.to_string(),
        kind,
    };

    let mut tokens = line.split_whitespace();

    let com = tokens
        .next()
        .ok_or_else(|| err(PayloadErrorKind::MissingCommandNumber))?;
    let com_num: u8 = com
        .parse()
        .map_err(|_| err(PayloadErrorKind::BadCommandNumber(com.to_string())))?;

    let flag = tokens
        .next()
        .ok_or_else(|| err(PayloadErrorKind::MissingReturnFlag))?;
    let want_return = match flag {
        "0" => false,
        "1" => true,
        other => return Err(err(PayloadErrorKind::BadReturnFlag(other.to_string()))),
    };

    let rest = tokens.collect::<Vec<_>>().join(" ");
    let (args, kwargs) = split_args(&rest).map_err(|e| err(e.kind))?;

    Ok(CommandCall {
        com_num,
        want_return,
        args,
        kwargs,
    })
}

/// Split a free-form argument string into positional and named arguments.
///
/// Accepts the human-typed `key=value, key2 = value2` convenience format:
/// commas become whitespace, every `=` is spaced out into its own token,
/// then tokens are consumed left to right. A token is a named-argument key
/// exactly when the next token is a bare `=`.
pub fn split_args(raw: &str) -> Result<(Vec<String>, BTreeMap<String, String>), PayloadError> {
    let normalized = raw.replace(',', " ").replace('=', " = ");

    let mut args = Vec::new();
    let mut kwargs = BTreeMap::new();

    let mut tokens = normalized.split_whitespace().peekable();
    while let Some(token) = tokens.next() {
        if tokens.peek() == Some(&"=") {
            tokens.next(); // consume the '='
            match tokens.next() {
                Some(value) => {
                    kwargs.insert(token.to_string(), value.to_string());
                }
                None => {
                    return Err(PayloadError {
                        payload: raw.to_string(),
                        kind: PayloadErrorKind::DanglingKey(token.to_string()),
                    });
                }
            }
        } else {
            args.push(token.to_string());
        }
    }

    Ok((args, kwargs))
}

/// Serialized response published on a return channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireReturn {
    /// Responding drone identifier, canonical string form.
    pub id: String,
    /// Command number the response answers, when known.
    pub com_num: Option<u8>,
    pub result: WireResult,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "body", rename_all = "snake_case")]
pub enum WireResult {
    /// The command's return value.
    Value(serde_json::Value),
    /// Acknowledgement for a command with no return value.
    Ack(String),
    /// Decode or execution failure, as reported text.
    Error(String),
}

impl WireReturn {
    pub fn value(id: impl Into<String>, com_num: u8, value: serde_json::Value) -> Self {
        Self {
            id: id.into(),
            com_num: Some(com_num),
            result: WireResult::Value(value),
        }
    }

    pub fn ack(id: impl Into<String>, com_num: u8, message: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            com_num: Some(com_num),
            result: WireResult::Ack(message.into()),
        }
    }

    pub fn error(id: impl Into<String>, com_num: Option<u8>, message: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            com_num,
            result: WireResult::Error(message.into()),
        }
    }
}
