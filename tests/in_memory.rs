//! In-memory integration tests for descriptor storage and dispatch.
//!
//! Tests are organized into modules by functionality:
//! - `store_tests`: Descriptor validation and persistence failures
//! - `timing_tests`: Call and total deadlines under a paused clock
//! - `exclusive_call_tests`: Queueing and rejection on process servers
//! - `lifecycle_tests`: Eviction, spawn failures and handshake failures

mod in_memory {
    pub mod helpers;

    mod exclusive_call_tests;
    mod lifecycle_tests;
    mod store_tests;
    mod timing_tests;
}
