//! Connectivity signals and the monitor that turns them into drain passes.
//!
//! A [`ConnectivitySource`] reports online/offline and foreground/background
//! transitions to subscribed handlers. [`ConnectivitySignals`] is the in-process
//! source the embedding application (or a [`ReachabilityProbe`]) feeds.
//! [`ConnectivityMonitor`] subscribes to a source and asks the sync engine to
//! drain when the device comes online, when the app returns to the foreground
//! while online, and on a timer while online.

use crate::{
    events::EventDispatcher,
    sync_engine::{DrainOutcome, SyncEngine},
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tasklist_core::{errors::ClientError, SyncResult};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::http::Uri;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityEvent {
    Online,
    Offline,
    Foreground,
    Background,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Visibility {
    #[default]
    Foreground,
    Background,
}

pub type ConnectivityHandler = Arc<dyn Fn(ConnectivityEvent) + Send + Sync>;

/// Anything that can tell whether the remote is reachable and announce changes.
pub trait ConnectivitySource: Send + Sync {
    fn is_online(&self) -> bool;

    /// Register a handler. It stays registered until the returned token is
    /// dropped or unsubscribed.
    fn on_connectivity_change(&self, handler: ConnectivityHandler) -> Subscription;
}

/// Registration token. Dropping it removes the handler.
#[must_use = "dropping a Subscription unregisters its handler"]
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    pub fn new(cancel: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    pub fn unsubscribe(mut self) {
        self.cancel_now();
    }

    fn cancel_now(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel_now();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}

struct SignalsInner {
    online: AtomicBool,
    visibility: Mutex<Visibility>,
    listeners: Mutex<HashMap<u64, ConnectivityHandler>>,
    next_id: AtomicU64,
}

/// In-process connectivity source. Only real transitions are broadcast.
#[derive(Clone)]
pub struct ConnectivitySignals {
    inner: Arc<SignalsInner>,
}

impl ConnectivitySignals {
    pub fn new(online: bool) -> Self {
        Self {
            inner: Arc::new(SignalsInner {
                online: AtomicBool::new(online),
                visibility: Mutex::new(Visibility::Foreground),
                listeners: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(0),
            }),
        }
    }

    pub fn set_online(&self, online: bool) {
        let was_online = self.inner.online.swap(online, Ordering::SeqCst);
        if was_online == online {
            return;
        }
        tracing::info!(
            "CLIENT: Connectivity changed: {}",
            if online { "online" } else { "offline" }
        );
        self.broadcast(if online {
            ConnectivityEvent::Online
        } else {
            ConnectivityEvent::Offline
        });
    }

    pub fn set_visibility(&self, visibility: Visibility) {
        let changed = match self.inner.visibility.lock() {
            Ok(mut current) => {
                let changed = *current != visibility;
                *current = visibility;
                changed
            }
            Err(_) => {
                tracing::error!("CLIENT: Visibility lock poisoned");
                false
            }
        };
        if changed {
            self.broadcast(match visibility {
                Visibility::Foreground => ConnectivityEvent::Foreground,
                Visibility::Background => ConnectivityEvent::Background,
            });
        }
    }

    pub fn visibility(&self) -> Visibility {
        self.inner
            .visibility
            .lock()
            .map(|v| *v)
            .unwrap_or_default()
    }

    pub fn listener_count(&self) -> usize {
        self.inner.listeners.lock().map(|l| l.len()).unwrap_or(0)
    }

    fn broadcast(&self, event: ConnectivityEvent) {
        // Handlers run outside the lock so they may subscribe or unsubscribe
        let handlers: Vec<ConnectivityHandler> = match self.inner.listeners.lock() {
            Ok(listeners) => listeners.values().cloned().collect(),
            Err(_) => return,
        };
        for handler in handlers {
            handler(event);
        }
    }
}

impl ConnectivitySource for ConnectivitySignals {
    fn is_online(&self) -> bool {
        self.inner.online.load(Ordering::SeqCst)
    }

    fn on_connectivity_change(&self, handler: ConnectivityHandler) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut listeners) = self.inner.listeners.lock() {
            listeners.insert(id, handler);
        }

        let inner: Weak<SignalsInner> = Arc::downgrade(&self.inner);
        Subscription::new(move || {
            if let Some(inner) = inner.upgrade() {
                if let Ok(mut listeners) = inner.listeners.lock() {
                    listeners.remove(&id);
                }
            }
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Trigger {
    Startup,
    CameOnline,
    Foreground,
    Timer,
    Requested,
}

/// Subscribes the sync engine to a connectivity source.
pub struct ConnectivityMonitor;

impl ConnectivityMonitor {
    /// Start watching `source`. The returned handle owns the subscription and
    /// the background task; dropping it stops both.
    pub fn spawn(
        engine: Arc<SyncEngine>,
        source: Arc<dyn ConnectivitySource>,
        events: Arc<EventDispatcher>,
        sync_interval: Duration,
    ) -> MonitorHandle {
        let (trigger_tx, mut trigger_rx) = mpsc::unbounded_channel::<Trigger>();

        let handler_tx = trigger_tx.clone();
        let handler_events = events.clone();
        let subscription = source.on_connectivity_change(Arc::new(move |event| {
            let trigger = match event {
                ConnectivityEvent::Online => {
                    handler_events.emit_connection_changed(true);
                    Some(Trigger::CameOnline)
                }
                ConnectivityEvent::Offline => {
                    handler_events.emit_connection_changed(false);
                    None
                }
                ConnectivityEvent::Foreground => Some(Trigger::Foreground),
                ConnectivityEvent::Background => None,
            };
            if let Some(trigger) = trigger {
                let _ = handler_tx.send(trigger);
            }
        }));

        let task = tokio::spawn(async move {
            let mut ticker =
                tokio::time::interval_at(Instant::now() + sync_interval, sync_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            let mut next = Some(Trigger::Startup);
            loop {
                let trigger = match next.take() {
                    Some(trigger) => trigger,
                    None => tokio::select! {
                        received = trigger_rx.recv() => match received {
                            Some(trigger) => trigger,
                            None => break,
                        },
                        _ = ticker.tick() => Trigger::Timer,
                    },
                };

                if !source.is_online() {
                    tracing::debug!("CLIENT: Offline, ignoring {:?} trigger", trigger);
                    continue;
                }

                tracing::debug!("CLIENT: Drain triggered by {:?}", trigger);
                match engine.trigger_sync().await {
                    Ok(DrainOutcome::Completed(report)) => tracing::debug!(
                        "CLIENT: Drain finished: {} synced, {} still queued",
                        report.synced,
                        report.remaining_queued
                    ),
                    Ok(DrainOutcome::Skipped(reason)) => {
                        tracing::debug!("CLIENT: Drain skipped: {:?}", reason)
                    }
                    Err(e) => tracing::error!("CLIENT: Drain failed: {}", e),
                }

                // Anything that arrived mid-pass collapses into one follow-up
                while let Ok(pending) = trigger_rx.try_recv() {
                    next = Some(pending);
                }
            }
            tracing::info!("CLIENT: Connectivity monitor stopped");
        });

        MonitorHandle {
            task: Some(task),
            subscription: Some(subscription),
            trigger_tx,
        }
    }
}

/// Owns a running [`ConnectivityMonitor`].
pub struct MonitorHandle {
    task: Option<JoinHandle<()>>,
    subscription: Option<Subscription>,
    trigger_tx: mpsc::UnboundedSender<Trigger>,
}

impl MonitorHandle {
    /// Ask for a drain pass. Ignored while offline.
    pub fn request_sync(&self) -> SyncResult<()> {
        self.trigger_tx
            .send(Trigger::Requested)
            .map_err(|_| ClientError::ConnectionLost.into())
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().map(|t| !t.is_finished()).unwrap_or(false)
    }

    /// Unsubscribe from the source and stop the background task.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        if let Some(subscription) = self.subscription.take() {
            subscription.unsubscribe();
        }
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for MonitorHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Drives [`ConnectivitySignals`] by periodically opening a TCP connection to
/// the remote's host and port.
pub struct ReachabilityProbe {
    host: String,
    port: u16,
    interval: Duration,
}

impl ReachabilityProbe {
    pub fn for_url(server_url: &str, interval: Duration) -> SyncResult<Self> {
        let uri: Uri = server_url
            .parse()
            .map_err(|e| ClientError::InvalidConfig(format!("invalid server URL: {}", e)))?;
        let host = uri
            .host()
            .ok_or_else(|| ClientError::InvalidConfig("server URL has no host".into()))?
            .trim_start_matches('[')
            .trim_end_matches(']')
            .to_string();
        let port = uri.port_u16().unwrap_or(match uri.scheme_str() {
            Some("wss") | Some("https") => 443,
            _ => 80,
        });

        Ok(Self {
            host,
            port,
            interval,
        })
    }

    pub fn target(&self) -> (&str, u16) {
        (&self.host, self.port)
    }

    pub async fn check(&self) -> bool {
        let connect = TcpStream::connect((self.host.as_str(), self.port));
        matches!(
            tokio::time::timeout(self.interval, connect).await,
            Ok(Ok(_))
        )
    }

    /// Probe forever, reporting each result to `signals`.
    pub fn spawn(self, signals: ConnectivitySignals) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let reachable = self.check().await;
                signals.set_online(reachable);
            }
        })
    }
}
