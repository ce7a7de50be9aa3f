// tests/common/mod.rs
//! Common test utilities for bridge integration tests.

pub mod mock_transport;

use std::time::Duration;

pub use mock_transport::MockTransport;

/// Poll `condition` until it holds, failing the test after two seconds.
pub async fn wait_until(what: &str, condition: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {what}"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
