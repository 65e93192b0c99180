mod common;

use common::*;
use sqlpeek::core::{CallArg, DebugError};
use sqlpeek::query::{QueryError, Session, TrackedHandle};

fn exec_args(sql: &str, db: u64, separator: &str) -> Vec<CallArg> {
    vec![
        CallArg::Str(sql.into()),
        CallArg::Pointer(db),
        CallArg::Str(separator.into()),
    ]
}

#[test]
fn test_count_blank_input_returns_minus_one_without_calls() {
    let mut session = session_with_handle();

    assert_eq!(session.execute_count(""), -1);
    assert_eq!(session.execute_count("   "), -1);
    assert!(session.control().calls.is_empty());
}

#[test]
fn test_print_blank_input_is_invalid() {
    let mut session = session_with_handle();
    let mut out = Vec::new();

    for statement in ["", "  \t", "\"\"", "\"   \""] {
        let err = session.execute_print(statement, &mut out).unwrap_err();
        assert!(matches!(err, QueryError::InvalidInput), "{:?}", statement);
    }
    assert!(out.is_empty());
    assert!(session.control().calls.is_empty());
}

#[test]
fn test_print_bad_literal_is_invalid() {
    let mut session = session_with_handle();
    let mut out = Vec::new();

    let err = session.execute_print(r#""select 1"#, &mut out).unwrap_err();
    assert!(matches!(err, QueryError::InvalidInput));
    assert!(session.control().calls.is_empty());
}

#[test]
fn test_unset_handle_is_not_found() {
    let mut session = session();
    assert_eq!(session.current_handle(), TrackedHandle::None);
    let mut out = Vec::new();

    assert!(matches!(
        session.execute_print("select 1", &mut out),
        Err(QueryError::HandleNotFound)
    ));
    assert!(matches!(
        session.execute_string("select 1"),
        Err(QueryError::HandleNotFound)
    ));
    assert!(matches!(
        session.execute_at("select 1", "frame 1"),
        Err(QueryError::HandleNotFound)
    ));
    assert_eq!(session.execute_count("select 1"), -1);

    let debugger = session.control();
    assert!(debugger.calls_to("sdh_exec").is_empty());
    assert!(debugger.calls_to("sdh_exec_at").is_empty());
    assert!(debugger.calls_to("sdh_exec_count").is_empty());
}

#[test]
fn test_direct_handle_single_call_and_single_free() {
    let mut session = session_with_handle();

    let text = session.execute_string("select 1").unwrap();
    assert_eq!(text, "1|one\n2|two\n");

    let debugger = session.control();
    let exec = debugger.calls_to("sdh_exec");
    assert_eq!(exec.len(), 1);
    assert_eq!(exec[0].args, exec_args("select 1", DB, "|"));
    assert_eq!(debugger.freed(), vec![BUFFER]);
}

#[test]
fn test_print_writes_buffer() {
    let mut session = session_with_handle();
    let mut out = Vec::new();

    session.execute_print("select * from t", &mut out).unwrap();
    assert_eq!(String::from_utf8(out).unwrap(), "1|one\n2|two\n");
    assert_eq!(session.control().freed(), vec![BUFFER]);
}

#[test]
fn test_print_decodes_string_literal() {
    let mut session = session_with_handle();
    let mut out = Vec::new();

    session
        .execute_print(r#""select \"a\\b\"\nfrom t""#, &mut out)
        .unwrap();
    let exec = session.control().calls_to("sdh_exec");
    assert_eq!(exec[0].args[0], CallArg::Str("select \"a\\b\"\nfrom t".into()));
}

#[test]
fn test_statement_is_escaped_once_when_rendered() {
    let mut session = session_with_handle();

    session.execute_string("select \"x\"\n").unwrap();
    let exec = session.control().calls_to("sdh_exec");
    let rendered = exec[0].to_string();
    assert!(rendered.starts_with(r#"sdh_exec((const char*)"select \"x\"\n", "#));
    assert!(!rendered.contains(r#"\\\""#));
}

#[test]
fn test_indirect_handle_is_dereferenced() {
    let mut session = session();
    session.control_mut().hit("sqlite3_open_v2", &[0x1234, SLOT, 6, 0]);
    session.control_mut().memory.insert(SLOT, DB);
    assert_eq!(session.current_handle(), TrackedHandle::Indirect(SLOT));

    session.execute_string("select 1").unwrap();
    let exec = session.control().calls_to("sdh_exec");
    assert_eq!(exec[0].args[1], CallArg::Pointer(DB));
}

#[test]
fn test_indirect_handle_not_yet_written() {
    let mut session = session();
    session.control_mut().hit("sqlite3_open", &[0x1234, SLOT]);
    session.control_mut().memory.insert(SLOT, 0);

    assert!(matches!(
        session.execute_string("select 1"),
        Err(QueryError::HandleNotFound)
    ));
    assert!(session.control().calls_to("sdh_exec").is_empty());
}

#[test]
fn test_unreadable_indirect_slot_is_call_failure() {
    let mut session = session();
    session.control_mut().hit("sqlite3_open16", &[0x1234, SLOT]);

    assert!(matches!(
        session.execute_string("select 1"),
        Err(QueryError::CallFailed(_))
    ));
}

#[test]
fn test_execute_at_arguments() {
    let mut session = session_with_handle();

    let text = session.execute_at("select x from t", "main.c:42").unwrap();
    assert_eq!(text, "1|one\n2|two\n");

    let debugger = session.control();
    let exec = debugger.calls_to("sdh_exec_at");
    assert_eq!(exec.len(), 1);
    assert_eq!(
        exec[0].args,
        vec![
            CallArg::Str("select x from t".into()),
            CallArg::Str("main.c:42".into()),
            CallArg::Pointer(DB),
            CallArg::Str("|".into()),
        ]
    );
    assert_eq!(debugger.freed(), vec![BUFFER]);
}

#[test]
fn test_execute_count() {
    let mut session = session_with_handle();
    session.control_mut().returns("sdh_exec_count", 42);

    assert_eq!(session.execute_count("select * from t"), 42);
    let debugger = session.control();
    let count = debugger.calls_to("sdh_exec_count");
    assert_eq!(
        count[0].args,
        vec![CallArg::Str("select * from t".into()), CallArg::Pointer(DB)]
    );
    assert!(debugger.freed().is_empty());
}

#[test]
fn test_execute_count_reads_c_int() {
    let mut session = session_with_handle();
    session.control_mut().returns("sdh_exec_count", 0xffff_ffff);
    assert_eq!(session.execute_count("select * from t"), -1);

    session.control_mut().returns("sdh_exec_count", 0xdead_0000_0007);
    assert_eq!(session.execute_count("select * from t"), 7);
}

#[test]
fn test_execute_count_failure_returns_minus_one() {
    let mut session = session_with_handle();
    session.control_mut().fails("sdh_exec_count", "no such table: t");

    assert_eq!(session.execute_count("select * from t"), -1);
}

#[test]
fn test_guard_restores_flags_after_call() {
    let mut session = session_with_handle();
    let debugger = session.control_mut();
    debugger.add_user_breakpoint("sqlite3_step", true);
    let disabled = debugger.add_user_breakpoint("main", false);
    debugger.add_user_breakpoint("sqlite3_exec", true);

    session.execute_string("select 1").unwrap();

    let debugger = session.control();
    for flags in &debugger.enabled_during_calls {
        assert_eq!(flags, &vec![false, false, false]);
    }
    assert_eq!(debugger.user_flags(), vec![true, false, true]);
    // The disabled breakpoint was never touched
    assert!(debugger.toggles.iter().all(|(id, _)| *id != disabled));
}

#[test]
fn test_guard_restores_flags_when_call_fails() {
    let mut session = session_with_handle();
    session.control_mut().add_user_breakpoint("sqlite3_step", true);
    session.control_mut().add_user_breakpoint("main", false);
    session.control_mut().fails("sdh_exec", "SIGSEGV at 0x10");

    let err = session.execute_string("select 1").unwrap_err();
    assert!(matches!(
        err,
        QueryError::CallFailed(DebugError::CallFailed { .. })
    ));

    let debugger = session.control();
    assert_eq!(debugger.enabled_during_calls.last(), Some(&vec![false, false]));
    assert_eq!(debugger.user_flags(), vec![true, false]);
    assert!(debugger.freed().is_empty());
}

#[test]
fn test_null_buffer_is_call_failure() {
    let mut session = session_with_handle();
    session.control_mut().returns("sdh_exec", 0);

    assert!(matches!(
        session.execute_string("select 1"),
        Err(QueryError::CallFailed(_))
    ));
    assert!(session.control().freed().is_empty());
}

#[test]
fn test_unreadable_buffer_is_still_freed() {
    let mut session = session_with_handle();
    session.control_mut().strings.clear();

    assert!(matches!(
        session.execute_string("select 1"),
        Err(QueryError::CallFailed(_))
    ));
    assert_eq!(session.control().freed(), vec![BUFFER]);
}

#[test]
fn test_separator_from_config_and_override() {
    let mut config = config();
    config.separator = Some(",".into());
    let mut session = Session::new(ScriptedDebugger::new(), &config);
    session.install_hooks().unwrap();
    session.control_mut().hit("sqlite3_prepare", &[DB]);

    session.execute_string("select 1").unwrap();
    session.set_separator("\t");
    session.execute_string("select 2").unwrap();

    let exec = session.control().calls_to("sdh_exec");
    assert_eq!(exec[0].args, exec_args("select 1", DB, ","));
    assert_eq!(exec[1].args, exec_args("select 2", DB, "\t"));
}

#[test]
fn test_not_running_is_a_warning() {
    let mut session = session_with_handle();
    session.control_mut().running = false;

    let err = session.execute_string("select 1").unwrap_err();
    assert!(matches!(err, QueryError::NotRunning));
    assert!(err.is_warning());
    assert_eq!(
        err.to_string(),
        "function and/or command only works if a program is running"
    );
    assert_eq!(session.execute_count("select 1"), -1);
}

#[test]
fn test_helper_loaded_once() {
    let mut session = session_with_handle();

    session.execute_string("select 1").unwrap();
    session.execute_at("select 2", "frame 0").unwrap();
    session.execute_count("select 3");

    let dlopen = session.control().calls_to("dlopen");
    assert_eq!(dlopen.len(), 1);
    assert_eq!(
        dlopen[0].args,
        vec![
            CallArg::Str("/opt/sqlpeek/libsdh.so".into()),
            CallArg::Int(0x102)
        ]
    );
    assert!(session.helper().is_loaded());
}

#[test]
fn test_helper_load_failure_reports_dlerror() {
    let mut session = session_with_handle();
    let debugger = session.control_mut();
    debugger.returns("dlopen", 0);
    debugger.returns("dlerror", DL_ERROR);
    debugger
        .strings
        .insert(DL_ERROR, b"libsdh.so: cannot open shared object file".to_vec());

    let err = session.execute_string("select 1").unwrap_err();
    match &err {
        QueryError::HelperLoad { reason, .. } => {
            assert!(reason.contains("cannot open shared object file"))
        }
        other => panic!("unexpected {:?}", other),
    }
    assert!(!err.is_warning());
    assert!(!session.helper().is_loaded());
    assert!(session.control().calls_to("sdh_exec").is_empty());
}

#[test]
fn test_helper_load_failure_without_dlerror() {
    let mut session = session_with_handle();
    session.control_mut().returns("dlopen", 0);

    let err = session.execute_string("select 1").unwrap_err();
    assert!(matches!(err, QueryError::HelperLoad { .. }));
}
