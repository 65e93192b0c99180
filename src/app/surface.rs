//! Query surface
//!
//! The four query operations as REPL entry points. `sql` prints through the
//! bridge; `sqlstr`, `sqlat` and `sqlcount` behave like expression functions
//! and take their argument either raw or as one string literal. Every
//! failure is turned into a single message here.

use std::io::{self, Write};

use colored::Colorize;

use crate::core::call::decode_argument;
use crate::core::DebugControl;
use crate::query::{QueryError, Session};

/// Print a query error as a warning or an error
pub fn report(err: &QueryError, out: &mut dyn Write) -> io::Result<()> {
    if err.is_warning() {
        writeln!(out, "{} Warning: {}", "[!]".yellow(), err)
    } else {
        writeln!(out, "{} Error: {}", "[!]".red(), err)
    }
}

fn decoded(argument: &str) -> Result<String, QueryError> {
    decode_argument(argument).map_err(|e| {
        log::debug!("Bad string literal {:?}: {}", argument, e);
        QueryError::InvalidInput
    })
}

/// `sql STATEMENT`
pub fn sql<D: DebugControl>(
    session: &mut Session<D>,
    statement: &str,
    out: &mut dyn Write,
) -> io::Result<()> {
    match session.execute_print(statement, out) {
        Ok(()) => Ok(()),
        Err(e) => report(&e, out),
    }
}

/// `sqlstr STATEMENT`
pub fn sql_string<D: DebugControl>(
    session: &mut Session<D>,
    argument: &str,
    out: &mut dyn Write,
) -> io::Result<()> {
    let result = decoded(argument).and_then(|statement| session.execute_string(&statement));
    match result {
        Ok(text) => write_text(&text, out),
        Err(e) => report(&e, out),
    }
}

/// `sqlat LOCATION STATEMENT`
pub fn sql_at<D: DebugControl>(
    session: &mut Session<D>,
    location: &str,
    argument: &str,
    out: &mut dyn Write,
) -> io::Result<()> {
    let result = decoded(argument).and_then(|statement| session.execute_at(&statement, location));
    match result {
        Ok(text) => write_text(&text, out),
        Err(e) => report(&e, out),
    }
}

/// `sqlcount STATEMENT`; failures are logged and yield -1
pub fn sql_count<D: DebugControl>(
    session: &mut Session<D>,
    argument: &str,
    out: &mut dyn Write,
) -> io::Result<()> {
    let count = match decode_argument(argument) {
        Ok(statement) => session.execute_count(&statement),
        Err(_) => -1,
    };
    writeln!(out, "{}", count)
}

fn write_text(text: &str, out: &mut dyn Write) -> io::Result<()> {
    out.write_all(text.as_bytes())?;
    if !text.is_empty() && !text.ends_with('\n') {
        writeln!(out)?;
    }
    Ok(())
}
