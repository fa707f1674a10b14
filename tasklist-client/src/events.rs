//! Event callbacks for the task client
//!
//! Events can be emitted from any thread or task (the mutation gateway, the sync
//! engine, the connectivity monitor). They are queued and only delivered when
//! `process_events()` is called, on the thread that registered the first callback.
//! Events emitted before any callback is registered are dropped.
//!
//! # Events
//!
//! - Task events: `TaskCreated`, `TaskUpdated`, `TaskDeleted`
//! - Sync events: `SyncStarted`, `SyncCompleted`
//! - Failures: `SyncError`, `EntryAbandoned`
//! - Connectivity: `ConnectionChanged`

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Mutex};
use std::thread::{self, ThreadId};
use tasklist_core::{
    errors::ClientError,
    models::{SyncAction, TaskId},
    SyncResult,
};

/// Event kinds, used to filter callbacks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    TaskCreated,
    TaskUpdated,
    TaskDeleted,
    SyncStarted,
    SyncCompleted,
    SyncError,
    EntryAbandoned,
    ConnectionChanged,
}

/// Typed event delivered to callbacks.
///
/// ```rust,no_run
/// use tasklist_client::events::{EventDispatcher, SyncEvent};
///
/// let dispatcher = EventDispatcher::new();
///
/// dispatcher.register_rust_callback(|event| {
///     match event {
///         SyncEvent::TaskCreated { id, title } => println!("Created: {} - {}", id, title),
///         SyncEvent::SyncCompleted { synced, remaining } => {
///             println!("Synced {} entries, {} still queued", synced, remaining)
///         }
///         _ => {}
///     }
/// }).unwrap();
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    /// A task was created locally
    TaskCreated { id: TaskId, title: String },
    /// A task was changed locally
    TaskUpdated { id: TaskId, title: String },
    /// A task was removed locally
    TaskDeleted { id: TaskId },
    /// A drain pass started
    SyncStarted,
    /// A drain pass finished
    SyncCompleted { synced: u64, remaining: u64 },
    /// A queue entry failed to reach the remote and will be retried
    SyncError {
        task_id: Option<TaskId>,
        message: String,
    },
    /// A queue entry hit the attempt ceiling and was dropped
    EntryAbandoned {
        task_id: TaskId,
        action: SyncAction,
        attempts: u32,
    },
    /// The connectivity source reported a transition
    ConnectionChanged { online: bool },
}

impl SyncEvent {
    pub fn event_type(&self) -> EventType {
        match self {
            SyncEvent::TaskCreated { .. } => EventType::TaskCreated,
            SyncEvent::TaskUpdated { .. } => EventType::TaskUpdated,
            SyncEvent::TaskDeleted { .. } => EventType::TaskDeleted,
            SyncEvent::SyncStarted => EventType::SyncStarted,
            SyncEvent::SyncCompleted { .. } => EventType::SyncCompleted,
            SyncEvent::SyncError { .. } => EventType::SyncError,
            SyncEvent::EntryAbandoned { .. } => EventType::EntryAbandoned,
            SyncEvent::ConnectionChanged { .. } => EventType::ConnectionChanged,
        }
    }
}

struct CallbackEntry {
    callback: Box<dyn Fn(SyncEvent) + Send>,
    event_filter: Option<EventType>,
}

/// Queues events from any thread and delivers them on the callback thread.
pub struct EventDispatcher {
    callbacks: Mutex<Vec<CallbackEntry>>,
    event_queue: Mutex<mpsc::Receiver<SyncEvent>>,
    event_sender: mpsc::Sender<SyncEvent>,
    callback_thread_id: Mutex<Option<ThreadId>>,
    has_callbacks: AtomicBool,
}

impl EventDispatcher {
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::channel();
        Self {
            callbacks: Mutex::new(Vec::new()),
            event_queue: Mutex::new(receiver),
            event_sender: sender,
            callback_thread_id: Mutex::new(None),
            has_callbacks: AtomicBool::new(false),
        }
    }

    /// Helper to set callback thread ID on first registration
    fn ensure_callback_thread(&self) -> SyncResult<()> {
        let mut thread_id = self
            .callback_thread_id
            .lock()
            .map_err(|_| ClientError::LockError("thread ID".into()))?;
        if thread_id.is_none() {
            *thread_id = Some(thread::current().id());
            tracing::info!(
                "Event callbacks will be processed on thread: {:?}",
                thread::current().id()
            );
        }
        Ok(())
    }

    /// Register a callback for all events
    pub fn register_rust_callback<F>(&self, callback: F) -> SyncResult<()>
    where
        F: Fn(SyncEvent) + Send + 'static,
    {
        self.register(Box::new(callback), None)
    }

    /// Register a callback that only receives events of one type
    pub fn register_rust_callback_filtered<F>(
        &self,
        callback: F,
        event_filter: EventType,
    ) -> SyncResult<()>
    where
        F: Fn(SyncEvent) + Send + 'static,
    {
        self.register(Box::new(callback), Some(event_filter))
    }

    fn register(
        &self,
        callback: Box<dyn Fn(SyncEvent) + Send>,
        event_filter: Option<EventType>,
    ) -> SyncResult<()> {
        self.ensure_callback_thread()?;

        let mut callbacks = self
            .callbacks
            .lock()
            .map_err(|_| ClientError::LockError("callbacks".into()))?;

        callbacks.push(CallbackEntry {
            callback,
            event_filter,
        });
        self.has_callbacks.store(true, Ordering::Release);

        Ok(())
    }

    pub fn emit_task_created(&self, id: TaskId, title: &str) {
        self.queue_event(SyncEvent::TaskCreated {
            id,
            title: title.to_string(),
        });
    }

    pub fn emit_task_updated(&self, id: TaskId, title: &str) {
        self.queue_event(SyncEvent::TaskUpdated {
            id,
            title: title.to_string(),
        });
    }

    pub fn emit_task_deleted(&self, id: TaskId) {
        self.queue_event(SyncEvent::TaskDeleted { id });
    }

    pub fn emit_sync_started(&self) {
        self.queue_event(SyncEvent::SyncStarted);
    }

    pub fn emit_sync_completed(&self, synced: u64, remaining: u64) {
        self.queue_event(SyncEvent::SyncCompleted { synced, remaining });
    }

    pub fn emit_sync_error(&self, task_id: Option<TaskId>, message: &str) {
        self.queue_event(SyncEvent::SyncError {
            task_id,
            message: message.to_string(),
        });
    }

    pub fn emit_entry_abandoned(&self, task_id: TaskId, action: SyncAction, attempts: u32) {
        self.queue_event(SyncEvent::EntryAbandoned {
            task_id,
            action,
            attempts,
        });
    }

    pub fn emit_connection_changed(&self, online: bool) {
        self.queue_event(SyncEvent::ConnectionChanged { online });
    }

    /// Queue an event for later processing on the callback thread
    fn queue_event(&self, event: SyncEvent) {
        // Nobody would ever drain it
        if !self.has_callbacks.load(Ordering::Acquire) {
            return;
        }
        if self.event_sender.send(event).is_err() {
            tracing::error!("Failed to queue event - receiver may have been dropped");
        }
    }

    /// Process all queued events. This MUST be called on the same thread where callbacks were registered.
    pub fn process_events(&self) -> SyncResult<usize> {
        {
            let thread_id = self
                .callback_thread_id
                .lock()
                .map_err(|_| ClientError::LockError("thread ID".into()))?;
            match *thread_id {
                Some(expected) if thread::current().id() != expected => {
                    return Err(ClientError::ThreadSafetyViolation.into());
                }
                Some(_) => {}
                None => return Err(ClientError::NoCallbacksRegistered.into()),
            }
        }

        let callbacks = self
            .callbacks
            .lock()
            .map_err(|_| ClientError::LockError("callbacks".into()))?;

        let receiver = self
            .event_queue
            .lock()
            .map_err(|_| ClientError::LockError("event queue".into()))?;

        let mut processed_count = 0;

        while let Ok(event) = receiver.try_recv() {
            let event_type = event.event_type();
            for entry in callbacks.iter() {
                if let Some(filter) = entry.event_filter {
                    if filter != event_type {
                        continue;
                    }
                }
                (entry.callback)(event.clone());
            }
            processed_count += 1;
        }

        Ok(processed_count)
    }
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new()
    }
}
