//! Lifecycle tests: run modes, argument outcomes, finalize-once and close.

use crate::support::{loader, server_with, RecordingEngine, SharedOutput, BOOTSTRAP, FINALIZE, VERSION};
use async_runtime::{LoopScope, NativeEvent, LOOP_VERSION};
use core_types::{JsError, Value};
use server::{
    LifecycleEvent, LifecyclePhase, ReplInput, RunMode, ScriptSource, Server,
    ServerConfig, ServerError, UsageError, EVAL_SOURCE, LOOP_VERSION_PROPERTY, REPL_SOURCE, VERSION_PROPERTY,
};
use std::cell::RefCell;
use std::io::{self, Write};
use std::rc::Rc;
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

#[test]
fn eval_runs_between_bootstrap_and_finalize() {
    let (engine, recorder) = RecordingEngine::new();
    let (mut server, output) = server_with(engine);

    server.run(&["-e", "1+1"]).unwrap();

    assert_eq!(recorder.calls(), vec![BOOTSTRAP, EVAL_SOURCE, FINALIZE]);
    assert_eq!(server.exit_code(), 0);
    assert_eq!(server.phase(), LifecyclePhase::Stopped);
    assert_eq!(output.contents(), "");

    let holder = recorder.holder();
    let system = recorder.principal();
    assert_eq!(&system, server.principal());
    assert_eq!(holder.run_mode(&system).unwrap(), RunMode::Eval);
    assert!(holder.user_files(&system).unwrap().is_empty());
    assert_eq!(holder.eval_string(&system).unwrap().as_deref(), Some("1+1"));
}

#[test]
fn print_mode_prints_the_result() {
    let (engine, _) = RecordingEngine::new();
    let (mut server, output) = server_with(engine);
    server.run(&["-p", "20+22"]).unwrap();
    assert_eq!(output.contents(), "42\n");
}

#[test]
fn unknown_flag_is_a_usage_error_before_any_script() {
    let (engine, recorder) = RecordingEngine::new();
    let (mut server, _) = server_with(engine);

    let err = server.run(&["--bogus"]).unwrap_err();

    assert!(matches!(
        err,
        ServerError::Usage(UsageError::UnrecognizedFlag(ref flag)) if flag == "--bogus"
    ));
    assert_ne!(err.exit_code(), 0);
    assert!(recorder.calls().is_empty());
    assert!(recorder.holder().flags(&recorder.principal()).unwrap().force_repl);
}

#[test]
fn version_dump_never_starts_the_loop() {
    for args in [vec!["--version"], vec!["-v", "app.js"], vec!["--bogus", "-v"]] {
        let (engine, recorder) = RecordingEngine::new();
        let (mut server, output) = server_with(engine);
        server.run(&args).unwrap();
        assert_eq!(output.contents(), format!("v{}\n", VERSION));
        assert!(recorder.calls().is_empty());
        assert_eq!(server.exit_code(), 0);
    }
}

#[test]
fn loop_version_and_help_dumps() {
    let (engine, _) = RecordingEngine::new();
    let (mut server, output) = server_with(engine);
    server.run(&["-uv"]).unwrap();
    assert_eq!(output.contents(), format!("v{}\n", LOOP_VERSION));

    let (engine, recorder) = RecordingEngine::new();
    let (mut server, output) = server_with(engine);
    server.run(&["-h"]).unwrap();
    assert!(output.contents().starts_with("Usage: corten-node"));
    assert!(recorder.calls().is_empty());
}

#[test]
fn bootstrap_failure_still_finalizes_once() {
    let (engine, recorder) = RecordingEngine::new();
    let engine = engine.failing(BOOTSTRAP, "boom").failing(FINALIZE, "late");
    let (mut server, _) = server_with(engine);

    let err = server.run(&["-e", "1"]).unwrap_err();

    let ServerError::Bootstrap(error) = err else {
        panic!("expected bootstrap failure, got {:?}", err);
    };
    assert_eq!(error.message, "boom");
    assert_eq!(error.suppressed.len(), 1);
    assert_eq!(error.suppressed[0].message, "late");
    assert_eq!(recorder.count(FINALIZE), 1);
    assert_eq!(recorder.count(EVAL_SOURCE), 0);
    assert_eq!(server.exit_code(), 1);
}

#[test]
fn recovered_bootstrap_failure_continues() {
    let (engine, recorder) = RecordingEngine::new();
    let engine = engine.failing(BOOTSTRAP, "recoverable");
    let (mut server, _) = server_with(engine);
    server.set_exception_handler(|_: &JsError| true);

    server.run(&["-e", "1"]).unwrap();
    assert_eq!(recorder.calls(), vec![BOOTSTRAP, EVAL_SOURCE, FINALIZE]);
    assert_eq!(server.exit_code(), 0);
}

#[test]
fn unrecovered_loop_error_sets_exit_code_and_finalizes() {
    let (engine, recorder) = RecordingEngine::new();
    let engine = engine.failing(EVAL_SOURCE, "thrown").failing(FINALIZE, "also");
    let (mut server, _) = server_with(engine);

    let err = server.run(&["-e", "x"]).unwrap_err();

    let error = err.script_error().unwrap();
    assert_eq!(error.message, "thrown");
    assert_eq!(error.suppressed[0].message, "also");
    assert!(matches!(err, ServerError::Loop(_)));
    assert_eq!(server.exit_code(), 1);
    assert_eq!(recorder.count(FINALIZE), 1);
}

#[test]
fn recovered_loop_error_lets_pending_timer_fire() {
    let fired = Rc::new(RefCell::new(false));
    let f = fired.clone();
    let (engine, recorder) = RecordingEngine::new();
    let engine = engine.on(EVAL_SOURCE, move |_: &ScriptSource, scope: &mut LoopScope<'_>| {
        let f = f.clone();
        scope.set_timer(Duration::from_millis(5), None, move |_, _| {
            *f.borrow_mut() = true;
            Ok(())
        });
        Err(JsError::error("after scheduling"))
    });
    let (mut server, _) = server_with(engine);
    server.set_exception_handler(|_: &JsError| true);

    server.run(&["-e", "setTimeout"]).unwrap();
    assert!(*fired.borrow());
    assert_eq!(server.exit_code(), 0);
    assert_eq!(recorder.count(FINALIZE), 1);
}

#[test]
fn finalize_failure_after_clean_run() {
    let (engine, _) = RecordingEngine::new();
    let engine = engine.failing(FINALIZE, "exit handler threw");
    let (mut server, _) = server_with(engine);

    let err = server.run(&["-e", "1"]).unwrap_err();
    assert!(matches!(err, ServerError::Finalize(ref e) if e.message == "exit handler threw"));
    assert_eq!(server.exit_code(), 1);
}

#[test]
fn security_error_is_never_recovered() {
    let (engine, _) = RecordingEngine::new();
    let engine = engine.on(EVAL_SOURCE, |_: &ScriptSource, _: &mut LoopScope<'_>| {
        Err(JsError::security("access denied"))
    });
    let (mut server, _) = server_with(engine);
    server.set_exception_handler(|_: &JsError| true);

    let err = server.run(&["-e", "1"]).unwrap_err();
    assert!(err.script_error().unwrap().is_security_error());
    assert_eq!(server.exit_code(), 1);
}

#[test]
fn user_file_is_read_and_evaluated() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("app.js"), "2+3").unwrap();

    let seen = Rc::new(RefCell::new(None));
    let s = seen.clone();
    let (engine, recorder) = RecordingEngine::new();
    let engine = engine.on("./app.js", move |source: &ScriptSource, _: &mut LoopScope<'_>| {
        *s.borrow_mut() = Some(source.code.clone());
        Ok(Value::Undefined)
    });
    let mut server = Server::builder(Box::new(engine), Arc::new(loader()))
        .with_config(ServerConfig::default().with_work_dir(dir.path()))
        .build()
        .unwrap();

    server.run(&["app.js", "--port", "80"]).unwrap();

    assert_eq!(seen.borrow().as_deref(), Some("2+3"));
    assert_eq!(recorder.calls(), vec![BOOTSTRAP, "./app.js", FINALIZE]);
    let holder = recorder.holder();
    let system = recorder.principal();
    assert_eq!(holder.user_files(&system).unwrap(), vec!["./app.js"]);
    assert_eq!(holder.user_args(&system).unwrap(), vec!["--port", "80"]);
}

#[test]
fn missing_user_file_is_a_loop_failure() {
    let dir = tempfile::tempdir().unwrap();
    let (engine, recorder) = RecordingEngine::new();
    let mut server = Server::builder(Box::new(engine), Arc::new(loader()))
        .with_config(ServerConfig::default().with_work_dir(dir.path()))
        .build()
        .unwrap();

    let err = server.run(&["missing.js"]).unwrap_err();
    assert!(err
        .script_error()
        .unwrap()
        .message
        .starts_with("Cannot find module './missing.js'"));
    assert_eq!(recorder.count(FINALIZE), 1);
}

#[test]
fn repl_evaluates_lines_until_end_of_input() {
    let (engine, recorder) = RecordingEngine::new();
    let output = SharedOutput::default();
    let mut server = Server::builder(Box::new(engine), Arc::new(loader()))
        .with_output(Box::new(output.clone()))
        .with_repl_input(ReplInput::Lines(vec!["1+2".into(), "3+4".into()]))
        .build()
        .unwrap();

    server.run::<&str>(&[]).unwrap();

    assert_eq!(output.contents(), "3\n7\n");
    assert_eq!(recorder.count(REPL_SOURCE), 2);
    assert_eq!(recorder.count(FINALIZE), 1);
}

#[test]
fn repl_reports_errors_and_continues() {
    let (engine, _) = RecordingEngine::new();
    let engine = engine.on(REPL_SOURCE, |source: &ScriptSource, _: &mut LoopScope<'_>| {
        if source.code == "bad" {
            Err(JsError::error("bad input"))
        } else {
            Ok(Value::from("ok"))
        }
    });
    let output = SharedOutput::default();
    let mut server = Server::builder(Box::new(engine), Arc::new(loader()))
        .with_output(Box::new(output.clone()))
        .with_repl_input(ReplInput::Lines(vec!["bad".into(), "good".into(), ".exit".into(), "never".into()]))
        .build()
        .unwrap();

    server.run(&["-i"]).unwrap();
    assert_eq!(output.contents(), "Error: bad input\nok\n");
}

#[test]
fn concurrent_close_finalizes_once() {
    const CLOSERS: usize = 8;
    let (engine, recorder) = RecordingEngine::new();
    let mut server = Server::builder(Box::new(engine), Arc::new(loader()))
        .with_config(ServerConfig::default().with_embedded(true))
        .build()
        .unwrap();

    let barrier = Arc::new(Barrier::new(CLOSERS));
    let closers: Vec<_> = (0..CLOSERS)
        .map(|_| {
            let closer = server.closer();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                closer.close()
            })
        })
        .collect();

    server.run(&["-e", "0"]).unwrap();

    let winners = closers
        .into_iter()
        .map(|h| h.join().unwrap())
        .filter(|won| *won)
        .count();
    assert_eq!(winners, 1);
    assert_eq!(recorder.count(FINALIZE), 1);
    assert_eq!(server.phase(), LifecyclePhase::Stopped);
    assert!(!server.close());
}

#[test]
fn close_wakes_loop_blocked_on_referenced_handle() {
    let (engine, recorder) = RecordingEngine::new();
    let opened = Rc::new(RefCell::new(None));
    let slot = opened.clone();
    let engine = engine.on(EVAL_SOURCE, move |_: &ScriptSource, scope: &mut LoopScope<'_>| {
        let id = scope.open(|_: &mut LoopScope<'_>, _: &NativeEvent| Ok(()));
        *slot.borrow_mut() = Some(id);
        Ok(Value::Undefined)
    });
    let (mut server, _) = server_with(engine);

    let closer = server.closer();
    let closing = thread::spawn(move || {
        thread::sleep(Duration::from_millis(30));
        closer.close()
    });

    server.run(&["-e", "listen"]).unwrap();

    assert!(closing.join().unwrap());
    assert!(opened.borrow().is_some());
    assert_eq!(recorder.count(FINALIZE), 1);
    assert_eq!(server.phase(), LifecyclePhase::Stopped);
    assert_eq!(server.exit_code(), 0);
}

#[test]
fn run_releases_the_loop_worker_pool() {
    let (engine, _) = RecordingEngine::new();
    let output = SharedOutput::default();
    let mut server = Server::builder(Box::new(engine), Arc::new(loader()))
        .with_output(Box::new(output.clone()))
        .with_repl_input(ReplInput::Lines(vec!["1+1".into()]))
        .build()
        .unwrap();
    let handle = server.loop_handle();
    assert!(!handle.is_shutdown());

    server.run::<&str>(&[]).unwrap();

    assert!(handle.is_stopped());
    assert!(handle.is_shutdown());
    assert_eq!(output.contents(), "2\n");
}

#[test]
fn print_survives_broken_output() {
    struct Broken;

    impl Write for Broken {
        fn write(&mut self, _: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "closed"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "closed"))
        }
    }

    let (engine, recorder) = RecordingEngine::new();
    let mut server = Server::builder(Box::new(engine), Arc::new(loader()))
        .with_output(Box::new(Broken))
        .build()
        .unwrap();

    server.run(&["-p", "1+1"]).unwrap();

    assert_eq!(server.exit_code(), 0);
    assert_eq!(recorder.calls(), vec![BOOTSTRAP, EVAL_SOURCE, FINALIZE]);
}

#[test]
fn listener_sees_started_then_stopped_and_cannot_abort() {
    let events = Rc::new(RefCell::new(Vec::new()));
    let e = events.clone();
    let (engine, recorder) = RecordingEngine::new();
    let mut server = Server::builder(Box::new(engine), Arc::new(loader()))
        .with_output(Box::new(SharedOutput::default()))
        .with_listener(move |event: LifecycleEvent| -> Result<(), JsError> {
            e.borrow_mut().push(event);
            Err(JsError::error("listener broke"))
        })
        .build()
        .unwrap();

    server.run(&["-e", "1"]).unwrap();
    assert_eq!(
        *events.borrow(),
        vec![LifecycleEvent::Started, LifecycleEvent::Stopped]
    );
    assert_eq!(recorder.count(FINALIZE), 1);
}

#[test]
fn second_run_is_rejected() {
    let (engine, _) = RecordingEngine::new();
    let (mut server, _) = server_with(engine);
    server.run(&["-e", "1"]).unwrap();
    assert!(matches!(
        server.run(&["-e", "1"]),
        Err(ServerError::AlreadyStarted)
    ));
}

#[test]
fn loop_version_mismatch_fails_construction() {
    let (engine, _) = RecordingEngine::new();
    let loader = loader().with_property(LOOP_VERSION_PROPERTY, "0.10.0");
    let err = Server::builder(Box::new(engine), Arc::new(loader))
        .build()
        .unwrap_err();
    assert!(matches!(
        err,
        ServerError::VersionMismatch { ref expected, ref found }
            if expected == "0.10.0" && found == LOOP_VERSION
    ));
}

#[test]
fn missing_build_property_fails_construction() {
    let (engine, _) = RecordingEngine::new();
    let loader = loader().without_property(VERSION_PROPERTY);
    let err = Server::builder(Box::new(engine), Arc::new(loader))
        .build()
        .unwrap_err();
    assert!(matches!(err, ServerError::MissingBuildProperty(ref name) if name == VERSION_PROPERTY));
}
