//! Test doubles shared by the engine tests.

use async_trait::async_trait;
use chargewatch_client::{AuthToken, ClientError, StatusSource};
use chargewatch_protocol::{Coordinates, StationId, StationState, StationSummary};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::error::Error;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::hook::{Hook, HookError, HookOutcome};
use crate::sink::EventSink;

/// Upstream that replays a script of per-station results.
///
/// Once the script runs out the last successful state is repeated.
#[derive(Default)]
pub(crate) struct ScriptedSource {
    script: Mutex<VecDeque<Option<StationState>>>,
    last: Mutex<StationState>,
    directory: Vec<StationSummary>,
    failing_logins: bool,
    latency: Duration,
    calls: AtomicUsize,
}

impl ScriptedSource {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Queue free counts to return, `None` meaning a failed call.
    pub(crate) fn with_script(self, frees: impl IntoIterator<Item = Option<usize>>) -> Self {
        *self.script.lock() = frees
            .into_iter()
            .map(|f| f.map(|free| StationState::with_counts(free, 4)))
            .collect();
        self
    }

    pub(crate) fn with_directory<'a>(
        mut self,
        entries: impl IntoIterator<Item = (StationId, &'a str)>,
    ) -> Self {
        self.directory = entries
            .into_iter()
            .map(|(id, name)| StationSummary::new(id, name))
            .collect();
        self
    }

    pub(crate) fn with_failing_logins(mut self) -> Self {
        self.failing_logins = true;
        self
    }

    /// Delay every station fetch by `latency`.
    pub(crate) fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Station fetches started so far.
    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StatusSource for ScriptedSource {
    async fn login(&self) -> Result<AuthToken, ClientError> {
        if self.failing_logins {
            return Err(ClientError::Auth("rejected".into()));
        }
        Ok(AuthToken::new("test-token"))
    }

    async fn station_state(
        &self,
        _token: &AuthToken,
        _id: StationId,
    ) -> Result<StationState, ClientError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        match self.script.lock().pop_front() {
            Some(Some(state)) => {
                *self.last.lock() = state.clone();
                Ok(state)
            }
            Some(None) => Err(ClientError::Status {
                endpoint: "/piles",
                status: 503,
            }),
            None => Ok(self.last.lock().clone()),
        }
    }

    async fn stations(
        &self,
        _token: &AuthToken,
        _position: Coordinates,
    ) -> Result<Vec<StationSummary>, ClientError> {
        Ok(self.directory.clone())
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

/// One observed hook call: current and previous free counts.
pub(crate) type Call = (usize, Option<usize>);

/// Hook that reports every call on a channel.
pub(crate) struct RecordingHook {
    tx: mpsc::UnboundedSender<Call>,
    calls: AtomicUsize,
    finish_after: Option<usize>,
    fail: bool,
}

impl RecordingHook {
    pub(crate) fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<Call>) {
        Self::build(None, false)
    }

    /// Reports `Finished` on its `n`th call.
    pub(crate) fn finishing_after(n: usize) -> (Arc<Self>, mpsc::UnboundedReceiver<Call>) {
        Self::build(Some(n), false)
    }

    /// Fails on every call.
    pub(crate) fn failing() -> (Arc<Self>, mpsc::UnboundedReceiver<Call>) {
        Self::build(None, true)
    }

    fn build(
        finish_after: Option<usize>,
        fail: bool,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<Call>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let hook = Arc::new(Self {
            tx,
            calls: AtomicUsize::new(0),
            finish_after,
            fail,
        });
        (hook, rx)
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Hook for RecordingHook {
    async fn on_update(
        &self,
        _station: &str,
        current: &StationState,
        previous: Option<&StationState>,
    ) -> Result<HookOutcome, HookError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        let _ = self
            .tx
            .send((current.free_count(), previous.map(StationState::free_count)));
        if self.fail {
            return Err(HookError::Other("hook exploded".into()));
        }
        if self.finish_after == Some(n) {
            return Ok(HookOutcome::Finished);
        }
        Ok(HookOutcome::Continue)
    }
}

/// Sink that keeps every message.
#[derive(Default)]
pub(crate) struct RecordingSink {
    pub(crate) errors: Mutex<Vec<String>>,
    pub(crate) warnings: Mutex<Vec<String>>,
}

impl EventSink for RecordingSink {
    fn on_error(&self, _error: &dyn Error, message: &str) {
        self.errors.lock().push(message.to_string());
    }

    fn on_warning(&self, message: &str) {
        self.warnings.lock().push(message.to_string());
    }
}

/// Wait for the next hook call, failing the test after `secs` of
/// (virtual) time.
pub(crate) async fn next_call(rx: &mut mpsc::UnboundedReceiver<Call>, secs: u64) -> Call {
    tokio::time::timeout(Duration::from_secs(secs), rx.recv())
        .await
        .expect("timed out waiting for hook call")
        .expect("hook channel closed")
}
