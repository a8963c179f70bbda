//! Scriptable connector and transport stubs.
//!
//! [`StubConnector`] establishes [`StubTransport`] sessions entirely in
//! memory. Connect attempts can be delayed (to widen the establishment
//! window timing tests race against) and failed from a script, one queued
//! failure per attempt, after which successful establishment resumes.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use docstore_driver_pool::{ConnectionError, Connector, ServerAddress, Transport};

/// In-memory connector for pool tests.
#[derive(Default)]
pub struct StubConnector {
    delay: Mutex<Option<Duration>>,
    failures: Mutex<VecDeque<ConnectionError>>,
    connects: AtomicUsize,
    shutdowns: Arc<AtomicUsize>,
}

impl StubConnector {
    /// A connector that establishes instantly and never fails.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A connector whose every connect attempt takes `delay`.
    #[must_use]
    pub fn with_delay(delay: Duration) -> Self {
        let connector = Self::default();
        *connector.delay.lock() = Some(delay);
        connector
    }

    /// Queue a failure for an upcoming connect attempt.
    ///
    /// Queued failures are consumed in order, one per attempt, before
    /// successful establishment resumes.
    pub fn fail_next(&self, error: ConnectionError) {
        self.failures.lock().push_back(error);
    }

    /// How many connect attempts were made, including failed ones.
    #[must_use]
    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// How many transports produced by this connector were shut down.
    #[must_use]
    pub fn shutdown_count(&self) -> usize {
        self.shutdowns.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for StubConnector {
    async fn connect(
        &self,
        address: &ServerAddress,
    ) -> Result<Box<dyn Transport>, ConnectionError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(error) = self.failures.lock().pop_front() {
            tracing::debug!(%address, %error, "stub connect failing per script");
            return Err(error);
        }
        Ok(Box::new(StubTransport {
            shutdowns: Arc::clone(&self.shutdowns),
        }))
    }
}

/// Established session stub that counts shutdowns.
///
/// The counter is shared with the producing [`StubConnector`], so a test
/// can assert how many sessions the pool destroyed in total and that none
/// was shut down twice.
#[derive(Debug)]
pub struct StubTransport {
    shutdowns: Arc<AtomicUsize>,
}

impl Transport for StubTransport {
    fn shutdown(&mut self) {
        self.shutdowns.fetch_add(1, Ordering::SeqCst);
    }
}
