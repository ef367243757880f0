//! Unit tests for the logger factory and the shared queue.

use logging::{LogQueue, Logging};
use std::collections::HashSet;
use std::sync::Arc;
use std::thread;

#[test]
fn instance_ids_are_unique_under_concurrent_creation() {
    let dir = tempfile::tempdir().unwrap();
    let logging = Arc::new(Logging::with_dir(Some(dir.path().to_path_buf()), true));

    let handles: Vec<_> = (0..8)
        .map(|n| {
            let logging = logging.clone();
            thread::spawn(move || {
                for m in 0..4 {
                    logging.get("worker").log(&format!("thread {} logger {}", n, m));
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
    logging.shutdown();

    let files: HashSet<String> = std::fs::read_dir(dir.path())
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .filter(|name| name.starts_with("worker-"))
        .collect();
    let expected: HashSet<String> = (0..32).map(|n| format!("worker-{}.log", n)).collect();
    assert_eq!(files, expected);
}

#[test]
fn ids_are_counted_per_category() {
    let dir = tempfile::tempdir().unwrap();
    let logging = Logging::with_dir(Some(dir.path().to_path_buf()), true);
    logging.get("a").log("a0");
    logging.get("b").log("b0");
    logging.get("a").log("a1");
    logging.shutdown();

    for name in ["a-0.log", "a-1.log", "b-0.log"] {
        assert!(dir.path().join(name).exists(), "{}", name);
    }
}

#[test]
fn loggers_created_while_disabled_write_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let logging = Logging::with_dir(Some(dir.path().to_path_buf()), true);
    logging.set_enabled(false);
    let quiet = logging.get("quiet");
    quiet.log("nothing");
    logging.shutdown();
    assert!(!dir.path().join("quiet-0.log").exists());
}

#[test]
fn shutdown_leaves_shared_queue_running() {
    let dir = tempfile::tempdir().unwrap();
    let queue = Arc::new(LogQueue::new());
    let borrower = Logging::with_queue(queue.clone(), true, Some(dir.path().to_path_buf()), true);
    borrower.shutdown();
    assert!(!queue.is_shutdown());

    borrower.get("still").log("written after borrower shutdown");
    queue.flush();
    let content = std::fs::read_to_string(dir.path().join("still-0.log")).unwrap();
    assert!(content.contains("written after borrower shutdown"));

    let owner = Logging::with_queue(queue.clone(), false, Some(dir.path().to_path_buf()), false);
    owner.shutdown();
    assert!(queue.is_shutdown());
}
