//! Tasklist - offline-first task storage with queued remote synchronization
//!
//! Every mutation commits locally together with a sync queue entry; a
//! background engine delivers the queue to the remote service whenever the
//! device is online.
//!
//! # Example
//!
//! ```ignore
//! use tasklist::{ClientConfig, TaskClient};
//!
//! let (client, signals) = TaskClient::connect(&ClientConfig::from_env()?).await?;
//! client.add("Buy milk", today).await?;
//! ```

// Re-export client types
pub use tasklist_client::{
    ClientConfig, ConnectivitySignals, ConnectivitySource, DrainOutcome, DrainReport,
    EventDispatcher, RemoteService, SyncEvent, TaskClient, WebSocketRemote,
};

// Re-export server types
pub use tasklist_server::{build_router, AppState as Server};

// Re-export core types that external applications may need
pub use tasklist_core::errors::SyncError;
pub use tasklist_core::models::{NewTask, Task, TaskChanges, TaskId, TaskQuery};
pub use tasklist_core::protocol::{ClientMessage, ServerMessage};
pub use tasklist_core::SyncResult;
