//! Unit tests for the dispatch adapter: same-turn draining, the asymmetric
//! drain policy and exception isolation.

use async_runtime::{CallbackKind, EventLoop, LoopConfig, NativeEvent};
use core_types::JsError;
use std::cell::RefCell;
use std::rc::Rc;

/// One payload per completion category.
fn sample_events() -> Vec<NativeEvent> {
    vec![
        NativeEvent::StreamRead { data: Some(vec![1]) },
        NativeEvent::StreamRead2 {
            data: None,
            pending: 0,
            handle_type: 0,
        },
        NativeEvent::StreamWrite { status: 0, error: None },
        NativeEvent::StreamConnect { status: 0, error: None },
        NativeEvent::StreamConnection { status: 0, error: None },
        NativeEvent::StreamShutdown { status: 0, error: None },
        NativeEvent::StreamClose,
        NativeEvent::File { error: None },
        NativeEvent::FileOpen { fd: 3, error: None },
        NativeEvent::FileRead {
            bytes_read: 0,
            data: vec![],
            error: None,
        },
        NativeEvent::FileWrite {
            bytes_written: 4,
            error: None,
        },
        NativeEvent::FileStat {
            stats: None,
            error: Some("ENOENT".into()),
        },
        NativeEvent::FileReadDir {
            names: vec!["a".into()],
            error: None,
        },
        NativeEvent::FileReadLink {
            target: Some("b".into()),
            error: None,
        },
        NativeEvent::FileUtime { time: 0, error: None },
        NativeEvent::FileClose { fd: 3, error: None },
        NativeEvent::FileEvent {
            status: 0,
            event: "change".into(),
            filename: "x".into(),
        },
        NativeEvent::FilePoll {
            status: 0,
            previous: None,
            current: None,
        },
        NativeEvent::FilePollStop,
        NativeEvent::ProcessExit {
            status: 0,
            signal: 0,
            error: None,
        },
        NativeEvent::ProcessClose,
        NativeEvent::Timer { status: 0 },
        NativeEvent::Signal { signum: 2 },
        NativeEvent::UdpRecv {
            nread: 0,
            data: vec![],
            address: None,
        },
        NativeEvent::UdpSend { status: 0, error: None },
        NativeEvent::UdpClose,
        NativeEvent::Idle { status: 0 },
        NativeEvent::Check { status: 0 },
        NativeEvent::Async,
    ]
}

/// Posts `first` to handle A and a signal to handle B, both before the loop
/// runs. A's callback queues an event. Returns the observed order.
fn run_pair(first: NativeEvent, fail_first: bool, recover: bool) -> (Vec<String>, Result<(), JsError>) {
    let mut event_loop = EventLoop::new(LoopConfig::default());
    event_loop.set_exception_handler(move |_: &JsError| recover);
    let order = Rc::new(RefCell::new(Vec::<String>::new()));

    let o = order.clone();
    let a = event_loop.scope().open(move |scope, _| {
        o.borrow_mut().push("A".into());
        let queued = o.clone();
        scope.enqueue(move |_| {
            queued.borrow_mut().push("A-queued".into());
            Ok(())
        });
        if fail_first {
            Err(JsError::error("A failed"))
        } else {
            Ok(())
        }
    });
    let o = order.clone();
    let b = event_loop.scope().request(move |_, _| {
        o.borrow_mut().push("B".into());
        Ok(())
    });
    event_loop.scope().unref(a);

    let handle = event_loop.handle();
    handle.post(a, first);
    handle.post(b, NativeEvent::Signal { signum: 1 });

    let result = event_loop.run();
    let observed = order.borrow().clone();
    (observed, result)
}

#[test]
fn queued_events_visible_before_next_completion_for_draining_kinds() {
    for event in sample_events() {
        let kind = event.kind();
        if !kind.drains_queued_events() {
            continue;
        }
        let (order, result) = run_pair(event, false, false);
        assert!(result.is_ok(), "{:?}", kind);
        assert_eq!(order, vec!["A", "A-queued", "B"], "{:?}", kind);
    }
}

#[test]
fn poll_and_process_kinds_defer_the_drain() {
    let mut checked = 0;
    for event in sample_events() {
        let kind = event.kind();
        if kind.drains_queued_events() {
            continue;
        }
        let (order, result) = run_pair(event, false, false);
        assert!(result.is_ok());
        assert_eq!(order, vec!["A", "B", "A-queued"], "{:?}", kind);
        checked += 1;
    }
    assert_eq!(checked, 4);
}

#[test]
fn recovered_error_does_not_abort_later_dispatch() {
    let (order, result) = run_pair(NativeEvent::Timer { status: 0 }, true, true);
    assert!(result.is_ok());
    assert_eq!(order, vec!["A", "A-queued", "B"]);
}

#[test]
fn unrecovered_error_stops_before_next_completion() {
    let (order, result) = run_pair(NativeEvent::StreamWrite { status: 0, error: None }, true, false);
    assert_eq!(result.unwrap_err().message, "A failed");
    assert_eq!(order, vec!["A"]);
}

#[test]
fn handler_consulted_once_per_error() {
    let mut event_loop = EventLoop::new(LoopConfig::default());
    let calls = Rc::new(RefCell::new(Vec::<String>::new()));
    let c = calls.clone();
    event_loop.set_exception_handler(move |error: &JsError| {
        c.borrow_mut().push(error.message.clone());
        true
    });
    let id = event_loop.scope().request(|scope, _| {
        scope.enqueue(|_| Err(JsError::error("queued failed")));
        Err(JsError::error("callback failed"))
    });
    event_loop.handle().post(id, NativeEvent::Check { status: 0 });

    event_loop.run().unwrap();
    assert_eq!(*calls.borrow(), vec!["callback failed", "queued failed"]);
    let stats = event_loop.stats();
    assert_eq!(stats.failures, 2);
    assert_eq!(stats.recovered, 2);
    assert_eq!(stats.drained, 1);
}

#[test]
fn security_error_is_fatal_even_when_handler_recovers() {
    let mut event_loop = EventLoop::new(LoopConfig::default());
    event_loop.set_exception_handler(|_: &JsError| true);
    let id = event_loop
        .scope()
        .request(|_, _| Err(JsError::security("access denied")));
    event_loop.handle().post(id, NativeEvent::UdpSend { status: 0, error: None });

    let error = event_loop.run().unwrap_err();
    assert!(error.is_security_error());
}

#[test]
fn every_category_has_a_sample() {
    let kinds: Vec<CallbackKind> = sample_events().iter().map(NativeEvent::kind).collect();
    assert_eq!(kinds.len(), 29);
    assert_eq!(async_runtime::dispatch::draining_kinds().count(), 25);
}
