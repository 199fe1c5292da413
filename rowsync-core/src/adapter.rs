//! Sync adapter: one per bound data source.
//!
//! ```text
//!              ┌──────────── SyncAdapter ────────────┐
//! TableModel ──┤ BindingObserver ─► ChangeEncoder ─► │──► MessageSink
//!    ▲         │                                     │
//!    └─────────┤ applier ◄── receive_message(raw) ◄──│◄── client frames
//!              └─────────────────────────────────────┘
//! ```
//!
//! The adapter subscribes to the source's change events and turns each one
//! into exactly one outbound message, synchronously and under the source
//! lock. Inbound frames are applied under the same lock, so both directions
//! are serialized per source.

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::applier::{self, ApplyReport};
use crate::encoder::{encoder_for, ChangeEncoder, FieldTable};
use crate::error::{Result, SyncError};
use crate::key_cache::RowKeyCache;
use crate::model::{FieldRef, ModelObserver, SharedModel, SubscriptionId, TableView};
use crate::protocol::{Protocol, ServerMessage};

/// Destination of encoded outbound messages.
pub trait MessageSink: Send + Sync {
    fn send(&self, message: Arc<str>);

    /// Whether anyone would receive a message sent now.
    fn has_subscribers(&self) -> bool {
        true
    }
}

/// Sink that keeps every message in memory.
#[derive(Debug, Default)]
pub struct CollectingSink {
    messages: Mutex<Vec<Arc<str>>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drain the raw frames received so far.
    pub fn take_raw(&self) -> Vec<Arc<str>> {
        std::mem::take(&mut *self.messages.lock())
    }

    /// Drain and parse the messages received so far.
    pub fn take(&self) -> Vec<ServerMessage> {
        self.take_raw()
            .iter()
            .filter_map(|raw| ServerMessage::from_json(raw).ok())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.messages.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.lock().is_empty()
    }
}

impl MessageSink for CollectingSink {
    fn send(&self, message: Arc<str>) {
        self.messages.lock().push(message);
    }
}

/// Adapter configuration, read when a source is bound.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdapterConfig {
    /// Field holding each row's logical key
    pub key: FieldRef,
    /// Wire shape of outbound messages
    pub protocol: Protocol,
    /// Capture field names once at bind instead of on every access
    pub cache_field_names: bool,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            key: FieldRef::Column(0),
            protocol: Protocol::KeyAddressed,
            cache_field_names: true,
        }
    }
}

impl AdapterConfig {
    pub fn keyed_by(key: FieldRef) -> Self {
        Self { key, ..Self::default() }
    }

    pub fn with_protocol(mut self, protocol: Protocol) -> Self {
        self.protocol = protocol;
        self
    }
}

/// Per-binding state shared with the observer registered on the source.
struct BindingState {
    fields: FieldTable,
    cache: Mutex<RowKeyCache>,
    encoder: Arc<dyn ChangeEncoder>,
    sink: Arc<dyn MessageSink>,
}

impl BindingState {
    fn emit(&self, message: ServerMessage) {
        match message.to_json() {
            Ok(json) => self.sink.send(Arc::from(json)),
            Err(e) => log::error!("Failed to encode {} message: {e}", message.operation()),
        }
    }

    fn snapshot(&self, view: &dyn TableView) -> Result<String> {
        self.encoder
            .snapshot(view, &self.fields)
            .to_json()
            .map_err(SyncError::Encode)
    }

    fn invalidate(&self) {
        self.cache.lock().invalidate();
    }
}

struct BindingObserver(Arc<BindingState>);

impl ModelObserver for BindingObserver {
    fn range_changed(&mut self, view: &dyn TableView, first: usize, last: usize) {
        let state = &self.0;
        state.emit(state.encoder.range_changed(view, &state.fields, first, last));
    }

    fn rows_about_to_be_removed(&mut self, view: &dyn TableView, first: usize, last: usize) {
        let state = &self.0;
        let message = state.encoder.rows_about_to_be_removed(view, &state.fields, first, last);
        state.invalidate();
        state.emit(message);
    }

    fn rows_inserted(&mut self, view: &dyn TableView, first: usize, last: usize) {
        let state = &self.0;
        state.invalidate();
        state.emit(state.encoder.rows_inserted(view, &state.fields, first, last));
    }

    fn reset(&mut self, view: &dyn TableView) {
        let state = &self.0;
        state.invalidate();
        state.emit(state.encoder.snapshot(view, &state.fields));
    }
}

struct Binding {
    model: SharedModel,
    subscription: SubscriptionId,
    state: Arc<BindingState>,
}

impl Binding {
    fn detach(self) {
        if !self.model.lock().unsubscribe(self.subscription) {
            log::debug!("Subscription {:?} was already gone", self.subscription);
        }
    }
}

/// Bridges one data source and the clients subscribed to it.
pub struct SyncAdapter {
    config: AdapterConfig,
    encoder: Arc<dyn ChangeEncoder>,
    sink: Arc<dyn MessageSink>,
    binding: RwLock<Option<Binding>>,
}

impl SyncAdapter {
    /// Create an unbound adapter that emits into `sink`.
    pub fn new(config: AdapterConfig, sink: Arc<dyn MessageSink>) -> Self {
        let encoder: Arc<dyn ChangeEncoder> = Arc::from(encoder_for(config.protocol));
        Self {
            config,
            encoder,
            sink,
            binding: RwLock::new(None),
        }
    }

    pub fn config(&self) -> &AdapterConfig {
        &self.config
    }

    pub fn protocol(&self) -> Protocol {
        self.encoder.protocol()
    }

    pub fn is_bound(&self) -> bool {
        self.binding.read().is_some()
    }

    /// Bind to `model`, replacing any previous binding.
    ///
    /// Field names are captured now and the key cache starts empty. If the
    /// sink already has subscribers they receive a fresh snapshot.
    pub fn bind(&self, model: SharedModel) {
        self.unbind();

        let binding = {
            let mut guard = model.lock();
            let state = Arc::new(BindingState {
                fields: FieldTable::new(guard.view(), self.config.key, self.config.cache_field_names),
                cache: Mutex::new(RowKeyCache::new(self.config.key)),
                encoder: self.encoder.clone(),
                sink: self.sink.clone(),
            });
            let subscription = guard.subscribe(Box::new(BindingObserver(state.clone())));
            if self.sink.has_subscribers() {
                state.emit(self.encoder.snapshot(guard.view(), &state.fields));
            }
            log::info!(
                "Adapter bound: {} rows, key {:?}, {:?}",
                guard.row_count(),
                self.config.key,
                self.encoder.protocol()
            );
            Binding {
                model: model.clone(),
                subscription,
                state,
            }
        };

        let previous = self.binding.write().replace(binding);
        if let Some(previous) = previous {
            previous.detach();
        }
    }

    /// Stop observing the bound source. No-op when unbound.
    pub fn unbind(&self) {
        let previous = self.binding.write().take();
        if let Some(binding) = previous {
            binding.detach();
            log::info!("Adapter unbound");
        }
    }

    fn current(&self) -> Result<(SharedModel, Arc<BindingState>)> {
        self.binding
            .read()
            .as_ref()
            .map(|b| (b.model.clone(), b.state.clone()))
            .ok_or(SyncError::NotBound)
    }

    /// Encode the full state of the source.
    pub fn snapshot(&self) -> Result<String> {
        self.snapshot_with(|| ()).map(|(snapshot, ())| snapshot)
    }

    /// Encode the full state and run `f` while the source is still locked.
    ///
    /// Nothing can change the source between the snapshot and `f`, so a
    /// subscription made inside `f` sees every later change and none of
    /// the earlier ones.
    pub fn snapshot_with<R>(&self, f: impl FnOnce() -> R) -> Result<(String, R)> {
        let (model, state) = self.current()?;
        let guard = model.lock();
        let snapshot = state.snapshot(guard.view())?;
        Ok((snapshot, f()))
    }

    /// Apply one inbound frame to the bound source.
    pub fn receive_message(&self, raw: &str) -> Result<ApplyReport> {
        let (model, state) = self.current()?;
        let mut guard = model.lock();
        match applier::apply(&mut *guard, &state.fields, &state.cache, raw) {
            Ok(report) => {
                log::debug!(
                    "Applied {:?}: {} applied, {} skipped, {} failed",
                    report.operation,
                    report.applied,
                    report.skipped,
                    report.failed
                );
                Ok(report)
            }
            Err(e) => {
                log::warn!("Dropping inbound message: {e}");
                Err(e.into())
            }
        }
    }

    /// Number of keys currently cached for the bound source.
    pub fn cached_keys(&self) -> usize {
        self.binding
            .read()
            .as_ref()
            .map_or(0, |b| b.state.cache.lock().len())
    }
}

impl Drop for SyncAdapter {
    fn drop(&mut self) {
        self.unbind();
    }
}
