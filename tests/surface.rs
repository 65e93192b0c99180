mod common;

use common::*;
use sqlpeek::app::surface;
use sqlpeek::core::CallArg;
use sqlpeek::query::QueryError;

fn output(run: impl FnOnce(&mut Vec<u8>) -> std::io::Result<()>) -> String {
    colored::control::set_override(false);
    let mut out = Vec::new();
    run(&mut out).unwrap();
    String::from_utf8(out).unwrap()
}

#[test]
fn test_report_warning_and_error() {
    let warning = output(|out| surface::report(&QueryError::NotRunning, out));
    assert_eq!(
        warning,
        "[!] Warning: function and/or command only works if a program is running\n"
    );

    let error = output(|out| surface::report(&QueryError::HandleNotFound, out));
    assert_eq!(error, "[!] Error: SQLite DB handle cannot be found\n");
}

#[test]
fn test_sql_prints_rows() {
    let mut session = session_with_handle();
    let text = output(|out| surface::sql(&mut session, "select * from t", out));
    assert_eq!(text, "1|one\n2|two\n");
}

#[test]
fn test_sql_reports_invalid_input() {
    let mut session = session_with_handle();
    let text = output(|out| surface::sql(&mut session, "\"\"", out));
    assert_eq!(text, "[!] Error: invalid input\n");
}

#[test]
fn test_sqlstr_accepts_literal() {
    let mut session = session_with_handle();
    session.control_mut().strings.insert(BUFFER, b"42".to_vec());

    let text = output(|out| surface::sql_string(&mut session, r#""select \"n\"""#, out));
    assert_eq!(text, "42\n");
    let exec = session.control().calls_to("sdh_exec");
    assert_eq!(exec[0].args[0], CallArg::Str("select \"n\"".into()));
}

#[test]
fn test_sqlat_passes_location() {
    let mut session = session_with_handle();
    let text = output(|out| surface::sql_at(&mut session, "frame 2", "select 1", out));
    assert_eq!(text, "1|one\n2|two\n");
    let exec = session.control().calls_to("sdh_exec_at");
    assert_eq!(exec[0].args[1], CallArg::Str("frame 2".into()));
}

#[test]
fn test_sqlcount_prints_number() {
    let mut session = session_with_handle();
    assert_eq!(output(|out| surface::sql_count(&mut session, "select 1", out)), "3\n");
    assert_eq!(output(|out| surface::sql_count(&mut session, "  ", out)), "-1\n");
    assert_eq!(output(|out| surface::sql_count(&mut session, "\"open", out)), "-1\n");
}

#[test]
fn test_not_running_is_reported_as_warning() {
    let mut session = session_with_handle();
    session.control_mut().running = false;
    let text = output(|out| surface::sql_string(&mut session, "select 1", out));
    assert!(text.starts_with("[!] Warning: "));
}
