//! Unit test suites for async_runtime

mod dispatch_test;
