//! In-process call description
//!
//! An [`InferiorCall`] is a function name plus typed arguments. Backends
//! that can marshal arguments directly (the ptrace backend) never build an
//! expression string; the C rendering produced by `Display` is what an
//! expression-evaluating debugger would be handed, and is what gets logged.

use std::fmt;

use thiserror::Error;

/// A single argument of an in-process call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallArg {
    /// NUL-terminated string, copied into the target before the call
    Str(String),
    /// Pointer-sized value passed through unchanged
    Pointer(u64),
    /// Signed integer
    Int(i64),
}

impl fmt::Display for CallArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallArg::Str(text) => write!(f, "(const char*){}", quote_c_string(text)),
            CallArg::Pointer(value) => write!(f, "(void*){:#x}", value),
            CallArg::Int(value) => write!(f, "{}", value),
        }
    }
}

/// A function call to run inside the target process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InferiorCall {
    pub function: String,
    pub args: Vec<CallArg>,
}

impl InferiorCall {
    pub fn new(function: impl Into<String>) -> Self {
        Self {
            function: function.into(),
            args: Vec::new(),
        }
    }

    pub fn str_arg(mut self, text: impl Into<String>) -> Self {
        self.args.push(CallArg::Str(text.into()));
        self
    }

    pub fn pointer_arg(mut self, value: u64) -> Self {
        self.args.push(CallArg::Pointer(value));
        self
    }

    pub fn int_arg(mut self, value: i64) -> Self {
        self.args.push(CallArg::Int(value));
        self
    }
}

impl fmt::Display for InferiorCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.function)?;
        for (i, arg) in self.args.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", arg)?;
        }
        write!(f, ")")
    }
}

/// Errors decoding a C string literal
#[derive(Error, Debug, PartialEq, Eq)]
pub enum LiteralError {
    #[error("unterminated string literal")]
    Unterminated,

    #[error("unsupported escape sequence '\\{0}'")]
    UnknownEscape(char),

    #[error("trailing characters after string literal")]
    TrailingInput,
}

/// Escape text for use inside a double-quoted C string literal.
///
/// Backslash, double quote and newline are the only characters rewritten.
pub fn escape_c_string(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len() + 2);
    for c in text.chars() {
        match c {
            '\\' => escaped.push_str("\\\\"),
            '"' => escaped.push_str("\\\""),
            '\n' => escaped.push_str("\\n"),
            _ => escaped.push(c),
        }
    }
    escaped
}

/// Escape and wrap in double quotes
pub fn quote_c_string(text: &str) -> String {
    format!("\"{}\"", escape_c_string(text))
}

/// Inverse of [`escape_c_string`]. Also accepts `\t` and `\r`.
pub fn unescape_c_string(escaped: &str) -> Result<String, LiteralError> {
    let mut text = String::with_capacity(escaped.len());
    let mut chars = escaped.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            text.push(c);
            continue;
        }
        match chars.next() {
            Some('\\') => text.push('\\'),
            Some('"') => text.push('"'),
            Some('n') => text.push('\n'),
            Some('t') => text.push('\t'),
            Some('r') => text.push('\r'),
            Some(other) => return Err(LiteralError::UnknownEscape(other)),
            None => return Err(LiteralError::Unterminated),
        }
    }
    Ok(text)
}

/// Split a leading double-quoted literal off `input`, returning the decoded
/// literal and the unparsed remainder.
pub fn take_string_literal(input: &str) -> Result<(String, &str), LiteralError> {
    let body = input
        .trim_start()
        .strip_prefix('"')
        .ok_or(LiteralError::Unterminated)?;

    let mut escaped = false;
    for (i, c) in body.char_indices() {
        match c {
            '\\' if !escaped => escaped = true,
            '"' if !escaped => {
                let text = unescape_c_string(&body[..i])?;
                return Ok((text, &body[i + 1..]));
            }
            _ => escaped = false,
        }
    }
    Err(LiteralError::Unterminated)
}

/// Decode `input` if it is exactly one double-quoted literal, otherwise
/// return it trimmed and unchanged.
pub fn decode_argument(input: &str) -> Result<String, LiteralError> {
    let input = input.trim();
    if !input.starts_with('"') {
        return Ok(input.to_string());
    }
    let (text, rest) = take_string_literal(input)?;
    if !rest.trim().is_empty() {
        return Err(LiteralError::TrailingInput);
    }
    Ok(text)
}
