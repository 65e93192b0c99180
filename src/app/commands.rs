//! Command processing
//!
//! Parses REPL input lines into [`AppCommand`]s.

use std::str::FromStr;

use crate::core::call::take_string_literal;
use crate::core::BreakpointId;

/// Commands understood by the REPL
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppCommand {
    /// Launch a program; empty reuses the previous command line
    Run(Vec<String>),
    Attach(u32),
    Continue,
    Detach,
    Kill,
    /// Set a user breakpoint on a function
    Break(String),
    Delete(BreakpointId),
    Enable(BreakpointId),
    Disable(BreakpointId),
    InfoBreakpoints,
    /// List running processes
    Processes,
    /// Execute and print
    Sql(String),
    /// Execute and return the result text
    SqlString(String),
    /// Execute at a location and return the result text
    SqlAt { location: String, sql: String },
    /// Execute and return the row count
    SqlCount(String),
    /// Show or set the separator
    Separator(Option<String>),
    /// Install the connection tracking breakpoints now
    Hooks,
    Status,
    Help,
    Quit,
    /// Unknown command or usage error
    Unknown(String),
}

/// Parse a command string into AppCommand
pub fn parse_command(input: &str) -> AppCommand {
    let input = input.trim();
    let (cmd, arg) = match input.split_once(char::is_whitespace) {
        Some((cmd, rest)) => (cmd, Some(rest.trim()).filter(|s| !s.is_empty())),
        None => (input, None),
    };

    match cmd {
        "run" | "r" => AppCommand::Run(
            arg.map(|a| a.split_whitespace().map(str::to_string).collect())
                .unwrap_or_default(),
        ),
        "attach" => match arg.and_then(parse_number) {
            Some(pid) => AppCommand::Attach(pid),
            None => AppCommand::Unknown("attach requires a PID".into()),
        },
        "continue" | "c" => AppCommand::Continue,
        "detach" => AppCommand::Detach,
        "kill" => AppCommand::Kill,
        "break" | "b" => match arg {
            Some(symbol) => AppCommand::Break(symbol.to_string()),
            None => AppCommand::Unknown("break requires a function name".into()),
        },
        "delete" | "enable" | "disable" => match arg.and_then(parse_number) {
            Some(id) => match cmd {
                "delete" => AppCommand::Delete(id),
                "enable" => AppCommand::Enable(id),
                _ => AppCommand::Disable(id),
            },
            None => AppCommand::Unknown(format!("{} requires a breakpoint number", cmd)),
        },
        "info" => match arg {
            Some("breakpoints" | "break" | "b") => AppCommand::InfoBreakpoints,
            _ => AppCommand::Unknown(input.to_string()),
        },
        "ps" => AppCommand::Processes,
        // Blank statements are rejected by the query layer, not here
        "sql" => AppCommand::Sql(arg.unwrap_or_default().to_string()),
        "sqlstr" => AppCommand::SqlString(arg.unwrap_or_default().to_string()),
        "sqlcount" => AppCommand::SqlCount(arg.unwrap_or_default().to_string()),
        "sqlat" => match arg.and_then(split_location) {
            Some((location, sql)) => AppCommand::SqlAt { location, sql },
            None => AppCommand::Unknown("sqlat requires a location and a statement".into()),
        },
        "separator" | "sep" => AppCommand::Separator(arg.map(str::to_string)),
        "hooks" => AppCommand::Hooks,
        "status" => AppCommand::Status,
        "help" | "?" => AppCommand::Help,
        "quit" | "exit" | "q" => AppCommand::Quit,
        _ => AppCommand::Unknown(input.to_string()),
    }
}

/// Parse a decimal or `0x` hex number
fn parse_number<T: FromStr + TryFrom<u64>>(s: &str) -> Option<T> {
    let s = s.trim();
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u64::from_str_radix(hex, 16).ok().and_then(|v| T::try_from(v).ok())
    } else {
        s.parse().ok()
    }
}

/// Split `sqlat` arguments into the location and the statement. A location
/// containing spaces is written as a string literal.
fn split_location(arg: &str) -> Option<(String, String)> {
    let (location, rest) = if arg.starts_with('"') {
        let (location, rest) = take_string_literal(arg).ok()?;
        (location, rest.trim_start())
    } else {
        let (location, rest) = arg.split_once(char::is_whitespace)?;
        (location.to_string(), rest.trim_start())
    };
    Some((location, rest.to_string()))
}
