//! Megaphone poller: one read loop per channel, fanned out to many streams.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::StreamExt;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

use megaphone_core::{
    decode_line, ChannelAddress, ChannelError, ChannelTransport, Chunk, DedupRing, LineSplitter,
    MegaphoneError,
};

use crate::config::{DecodeErrorPolicy, PollerConfig};
use crate::registry::{Dispatch, ShouldContinue, SinkId, StreamRegistry};
use crate::subscription::{CancelHandle, Subscription};

/// What a stream factory hands back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelGrant {
    /// Channel to read from. `None` when the caller reuses the channel the
    /// poller is already bound to.
    pub channel_address: Option<ChannelAddress>,
    /// Stream ids to register. All of them share one subscription.
    pub stream_ids: Vec<String>,
}

impl ChannelGrant {
    pub fn new(channel_address: ChannelAddress, stream_ids: Vec<String>) -> Self {
        Self {
            channel_address: Some(channel_address),
            stream_ids,
        }
    }

    /// Grant on the channel the poller is currently reading.
    pub fn reuse(stream_ids: Vec<String>) -> Self {
        Self {
            channel_address: None,
            stream_ids,
        }
    }
}

/// Read loop state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollerState {
    /// No loop running, no channel bound.
    Idle,
    /// One loop is reading the bound channel.
    Reading(ChannelAddress),
}

impl PollerState {
    pub fn channel_address(&self) -> Option<&ChannelAddress> {
        match self {
            Self::Idle => None,
            Self::Reading(address) => Some(address),
        }
    }
}

impl std::fmt::Display for PollerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Reading(address) => write!(f, "reading {address}"),
        }
    }
}

/// Metrics snapshot for the poller.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PollerMetrics {
    /// Reads opened against the transport.
    pub reads: u64,
    pub chunks_delivered: u64,
    pub duplicates_dropped: u64,
    /// Chunks for stream ids nobody is registered for.
    pub unrouted: u64,
    pub decode_errors: u64,
    pub channel_failures: u64,
}

/// Everything the read loop and callers mutate, behind one lock.
struct ChannelState {
    state: PollerState,
    registry: StreamRegistry,
    dedup: DedupRing,
    metrics: PollerMetrics,
}

impl ChannelState {
    /// `Idle -> Reading`, only when idle and there is something to read for.
    fn try_start(&mut self, address: &ChannelAddress) -> bool {
        if self.state != PollerState::Idle || self.registry.is_empty() {
            return false;
        }
        self.state = PollerState::Reading(address.clone());
        true
    }
}

pub(crate) struct Shared {
    transport: Arc<dyn ChannelTransport>,
    config: PollerConfig,
    channel: Mutex<ChannelState>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, ChannelState> {
        self.channel.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn remove_streams(&self, stream_ids: &[String], sink_id: SinkId) -> usize {
        self.lock().registry.remove_owned(stream_ids, sink_id)
    }

    async fn run(self: Arc<Self>, address: ChannelAddress) {
        info!(channel = %address, url = self.transport.url(), "megaphone reader started");

        loop {
            if self.go_idle_if_drained() {
                info!(channel = %address, "all streams removed, reader stopped");
                return;
            }
            match self.read_cycle(&address.consumer).await {
                Ok(()) => debug!(channel = %address, "read ended, reopening"),
                Err(err) => {
                    self.fail(&address, err);
                    return;
                }
            }
        }
    }

    /// Checked only between reads: a read in progress always runs to its end.
    fn go_idle_if_drained(&self) -> bool {
        let mut channel = self.lock();
        if channel.registry.is_empty() {
            channel.state = PollerState::Idle;
            true
        } else {
            false
        }
    }

    async fn read_cycle(&self, consumer: &str) -> Result<(), ChannelError> {
        self.lock().metrics.reads += 1;
        let mut stream = self.transport.read(consumer).await?;
        let mut lines = LineSplitter::new();

        while let Some(item) = stream.next().await {
            let bytes = item?;
            for line in lines.push(&bytes) {
                self.handle_line(&line)?;
            }
        }
        if let Some(line) = lines.finish() {
            self.handle_line(&line)?;
        }
        Ok(())
    }

    fn handle_line(&self, line: &str) -> Result<(), ChannelError> {
        let chunk = match decode_line(line) {
            Ok(chunk) => chunk,
            Err(err) => {
                self.lock().metrics.decode_errors += 1;
                return match self.config.decode_errors {
                    DecodeErrorPolicy::Skip => {
                        warn!(error = %err, "skipping undecodable line");
                        Ok(())
                    }
                    DecodeErrorPolicy::FailChannel => Err(err.into()),
                };
            }
        };

        let mut channel = self.lock();
        if !channel.dedup.check_and_record(&chunk.event_id) {
            trace!(event_id = %chunk.event_id, "duplicate chunk dropped");
            channel.metrics.duplicates_dropped += 1;
            return Ok(());
        }

        let stream_id = chunk.stream_id.clone();
        match channel.registry.dispatch(chunk) {
            Dispatch::Delivered => {
                channel.metrics.chunks_delivered += 1;
            }
            Dispatch::Completed => {
                channel.metrics.chunks_delivered += 1;
                debug!(stream_id = %stream_id, "stream completed");
            }
            Dispatch::Closed => {
                debug!(stream_id = %stream_id, "subscriber gone, stream removed");
            }
            Dispatch::Unrouted => {
                trace!(stream_id = %stream_id, "no subscriber for chunk");
                channel.metrics.unrouted += 1;
            }
        }
        Ok(())
    }

    fn fail(&self, address: &ChannelAddress, err: ChannelError) {
        let mut channel = self.lock();
        let notified = channel.registry.fail_all(&err);
        channel.state = PollerState::Idle;
        channel.metrics.channel_failures += 1;
        warn!(channel = %address, error = %err, notified, "megaphone channel failed");
    }
}

/// Client for one Megaphone channel.
///
/// Cheap to clone; clones share the same read loop and registry.
#[derive(Clone)]
pub struct MegaphonePoller {
    inner: Arc<Shared>,
}

impl MegaphonePoller {
    /// Create an idle poller. Fails on an invalid config.
    pub fn new(
        transport: Arc<dyn ChannelTransport>,
        config: PollerConfig,
    ) -> Result<Self, MegaphoneError> {
        config.validate()?;
        let dedup = DedupRing::new(config.dedup_capacity)?;
        Ok(Self {
            inner: Arc::new(Shared {
                transport,
                config,
                channel: Mutex::new(ChannelState {
                    state: PollerState::Idle,
                    registry: StreamRegistry::new(),
                    dedup,
                    metrics: PollerMetrics::default(),
                }),
            }),
        })
    }

    /// Open a subscription for the stream ids the factory returns.
    ///
    /// `factory` receives the producer id of the currently bound channel, if
    /// any. Its error is returned to this caller only. `should_continue`
    /// runs after every delivered chunk: `false` removes that stream id. It
    /// is called with the poller's lock held and must not call back into the
    /// poller.
    pub async fn open_stream<T, F, Fut, E, P>(
        &self,
        factory: F,
        should_continue: P,
    ) -> Result<Subscription<T>, MegaphoneError>
    where
        T: DeserializeOwned,
        F: FnOnce(Option<String>) -> Fut,
        Fut: Future<Output = Result<ChannelGrant, E>>,
        E: Into<Box<dyn std::error::Error + Send + Sync + 'static>>,
        P: Fn(&str, &Chunk<Value>) -> bool + Send + Sync + 'static,
    {
        let producer = self
            .inner
            .lock()
            .state
            .channel_address()
            .map(|address| address.producer.clone());

        let grant = factory(producer)
            .await
            .map_err(|e| MegaphoneError::Factory(e.into()))?;

        let (tx, rx) = mpsc::unbounded_channel();
        let should_continue: ShouldContinue = Arc::new(should_continue);

        let (sink_id, start) = {
            let mut channel = self.inner.lock();
            let sink_id = channel
                .registry
                .register(&grant.stream_ids, tx, should_continue)?;
            let start = grant
                .channel_address
                .filter(|address| channel.try_start(address));
            (sink_id, start)
        };

        debug!(streams = ?grant.stream_ids, "streams registered");
        if let Some(address) = start {
            tokio::spawn(Arc::clone(&self.inner).run(address));
        }

        let cancel = CancelHandle::new(grant.stream_ids, sink_id, Arc::downgrade(&self.inner));
        Ok(Subscription::new(rx, cancel))
    }

    /// Subscription that stays registered until cancelled.
    pub async fn open_unbounded_stream<T, F, Fut, E>(
        &self,
        factory: F,
    ) -> Result<Subscription<T>, MegaphoneError>
    where
        T: DeserializeOwned,
        F: FnOnce(Option<String>) -> Fut,
        Fut: Future<Output = Result<ChannelGrant, E>>,
        E: Into<Box<dyn std::error::Error + Send + Sync + 'static>>,
    {
        self.open_stream(factory, |_, _| true).await
    }

    /// Subscription that ends after the first chunk for each of its ids.
    pub async fn open_delayed_response<T, F, Fut, E>(
        &self,
        factory: F,
    ) -> Result<Subscription<T>, MegaphoneError>
    where
        T: DeserializeOwned,
        F: FnOnce(Option<String>) -> Fut,
        Fut: Future<Output = Result<ChannelGrant, E>>,
        E: Into<Box<dyn std::error::Error + Send + Sync + 'static>>,
    {
        self.open_stream(factory, |_, _| false).await
    }

    pub fn state(&self) -> PollerState {
        self.inner.lock().state.clone()
    }

    /// Number of registered stream ids.
    pub fn active_streams(&self) -> usize {
        self.inner.lock().registry.len()
    }

    pub fn metrics(&self) -> PollerMetrics {
        self.inner.lock().metrics.clone()
    }

    pub fn config(&self) -> &PollerConfig {
        &self.inner.config
    }
}

impl std::fmt::Debug for MegaphonePoller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MegaphonePoller")
            .field("url", &self.inner.transport.url())
            .field("state", &self.state())
            .finish()
    }
}
