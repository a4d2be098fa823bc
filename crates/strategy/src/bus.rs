use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{broadcast, Mutex, RwLock};
use tracing::{debug, error, info, warn};

use common::{Error, Event, EventKind, EventSet, Result};
use history::Store;

use crate::Strategy;

/// Shared destination for events the pump accepts.
pub type EventSink = Arc<Mutex<EventSet>>;

/// Callback invoked for every handled event of a subscribed kind.
pub type EventCallback = Arc<dyn Fn(&Event) -> Result<()> + Send + Sync>;

/// Token returned by [`EventBus::subscribe`], used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum PumpState {
    #[default]
    Stopped,
    Starting,
    Running,
    Stopping,
}

#[derive(Default)]
struct Registry {
    handlers: HashMap<EventKind, Vec<(HandlerId, EventCallback)>>,
    strategies: Vec<Arc<dyn Strategy>>,
}

/// Dispatches events to typed subscribers and drives registered strategies
/// whenever the store reports fresh bars.
///
/// Cheap handle; clone freely. The pump runs as a background task between
/// `start` and `stop`, re-reading the notified key's series from the store
/// on every token — lost tokens are therefore harmless.
#[derive(Clone, Default)]
pub struct EventBus {
    registry: Arc<RwLock<Registry>>,
    state: Arc<RwLock<PumpState>>,
    next_id: Arc<AtomicU64>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback for one event kind. Handlers run in registration
    /// order.
    pub async fn subscribe<F>(&self, kind: EventKind, handler: F) -> HandlerId
    where
        F: Fn(&Event) -> Result<()> + Send + Sync + 'static,
    {
        let id = HandlerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut registry = self.registry.write().await;
        registry
            .handlers
            .entry(kind)
            .or_default()
            .push((id, Arc::new(handler)));
        id
    }

    /// Drop a previously registered callback.
    pub async fn unsubscribe(&self, kind: EventKind, id: HandlerId) -> bool {
        let mut registry = self.registry.write().await;
        let Some(handlers) = registry.handlers.get_mut(&kind) else {
            return false;
        };
        let before = handlers.len();
        handlers.retain(|(hid, _)| *hid != id);
        handlers.len() < before
    }

    /// Invoke every subscriber for the event's kind in registration order.
    /// The first failing handler short-circuits and its error is surfaced.
    pub async fn handle(&self, event: &Event) -> Result<()> {
        let handlers: Vec<EventCallback> = {
            let registry = self.registry.read().await;
            match registry.handlers.get(&event.kind) {
                Some(handlers) => handlers.iter().map(|(_, cb)| cb.clone()).collect(),
                None => return Ok(()),
            }
        };

        for handler in handlers {
            handler(event).map_err(|e| Error::Handler(e.to_string()))?;
        }
        Ok(())
    }

    pub async fn handle_many(&self, events: &EventSet) -> Result<()> {
        for event in events {
            self.handle(event).await?;
        }
        Ok(())
    }

    /// Register a strategy, keyed by its stable name.
    pub async fn add_strategy(&self, strategy: Arc<dyn Strategy>) -> Result<()> {
        let mut registry = self.registry.write().await;
        let name = strategy.name().to_string();
        if registry.strategies.iter().any(|s| s.name() == name) {
            return Err(Error::DuplicateStrategy(name));
        }
        info!(strategy = %name, "strategy added");
        registry.strategies.push(strategy);
        Ok(())
    }

    pub async fn remove_strategy(&self, name: &str) -> Result<()> {
        let mut registry = self.registry.write().await;
        let before = registry.strategies.len();
        registry.strategies.retain(|s| s.name() != name);
        if registry.strategies.len() == before {
            return Err(Error::NotFound);
        }
        info!(strategy = %name, "strategy removed");
        Ok(())
    }

    pub async fn strategy_names(&self) -> Vec<String> {
        self.registry
            .read()
            .await
            .strategies
            .iter()
            .map(|s| s.name().to_string())
            .collect()
    }

    /// Start the live pump: whenever the store reports a key with fresh
    /// bars, run every registered strategy on that key's series, collect
    /// accepted events into `sink` and dispatch them to subscribers.
    ///
    /// Fails with `AlreadyRunning` when the pump is not stopped. Tokens
    /// queued before the pump subscribes are discarded.
    pub async fn start(&self, store: &Store, sink: EventSink) -> Result<()> {
        {
            let mut state = self.state.write().await;
            if *state != PumpState::Stopped {
                return Err(Error::AlreadyRunning);
            }
            *state = PumpState::Starting;
        }

        // subscribing now (not earlier) is what drains pre-start tokens:
        // a fresh receiver only sees what is sent after this point
        let mut rx = store.subscribe();
        while rx.try_recv().is_ok() {}

        *self.state.write().await = PumpState::Running;
        info!("event pump started");

        let bus = self.clone();
        let store = store.clone();
        tokio::spawn(async move { bus.pump(store, rx, sink).await });
        Ok(())
    }

    /// Request pump termination. The loop observes the flag at its next
    /// iteration boundary; in-flight strategy runs complete first.
    pub async fn stop(&self) -> Result<()> {
        let mut state = self.state.write().await;
        if *state != PumpState::Running {
            return Err(Error::NotRunning);
        }
        *state = PumpState::Stopping;
        Ok(())
    }

    async fn pump(self, store: Store, mut rx: broadcast::Receiver<String>, sink: EventSink) {
        loop {
            if *self.state.read().await == PumpState::Stopping {
                break;
            }

            let recv = tokio::time::timeout(std::time::Duration::from_millis(250), rx.recv());
            match recv.await {
                Ok(Ok(symbol)) => self.run_strategies(&store, &symbol, &sink).await,
                Ok(Err(broadcast::error::RecvError::Lagged(n))) => {
                    warn!(dropped = n, "notification channel lagged");
                }
                Ok(Err(broadcast::error::RecvError::Closed)) => break,
                // timeout: no token, loop around to re-check the state flag
                Err(_) => {}
            }
        }

        *self.state.write().await = PumpState::Stopped;
        info!("event pump stopped");
    }

    async fn run_strategies(&self, store: &Store, symbol: &str, sink: &EventSink) {
        let strategies: Vec<Arc<dyn Strategy>> =
            self.registry.read().await.strategies.clone();
        if strategies.is_empty() {
            return;
        }

        let bars = store.get_bars(symbol).await;
        if bars.is_empty() {
            return;
        }

        for strategy in strategies {
            let outcome = catch_unwind(AssertUnwindSafe(|| strategy.on_bar(symbol, &bars)));
            let event = match outcome {
                Ok(event) => event,
                Err(_) => {
                    error!(strategy = %strategy.name(), symbol = %symbol, "strategy panicked");
                    continue;
                }
            };

            let Some(event) = event else { continue };
            if !sink.lock().await.add(event.clone()) {
                debug!(symbol = %symbol, kind = %event.kind, "duplicate event dropped");
                continue;
            }
            info!(
                symbol = %event.symbol,
                kind = %event.kind,
                price = event.price,
                "event accepted"
            );
            if let Err(e) = self.handle(&event).await {
                warn!(error = %e, "event handler failed");
            }
        }
    }
}
