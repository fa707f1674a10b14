use crate::{
    config::ClientConfig,
    connectivity::{
        ConnectivityMonitor, ConnectivitySignals, ConnectivitySource, MonitorHandle,
        ReachabilityProbe,
    },
    database::ClientDatabase,
    events::EventDispatcher,
    gateway::MutationGateway,
    remote::RemoteService,
    sync_engine::{DrainOutcome, SyncEngine},
    websocket::WebSocketRemote,
};
use chrono::NaiveDate;
use std::sync::{Arc, Mutex};
use tasklist_core::{
    models::{
        NewTask, SyncQueueEntry, SyncStatusReport, Task, TaskChanges, TaskId, TaskIdGenerator,
        TaskPage, TaskQuery,
    },
    SyncResult,
};
use tokio::task::JoinHandle;

/// Offline-first task store with background sync.
///
/// Writes go to the local database and the sync queue immediately; a
/// connectivity monitor replays the queue against the remote service.
pub struct TaskClient {
    db: Arc<ClientDatabase>,
    gateway: MutationGateway,
    engine: Arc<SyncEngine>,
    events: Arc<EventDispatcher>,
    connectivity: Arc<dyn ConnectivitySource>,
    monitor: Mutex<Option<MonitorHandle>>,
    probe: Mutex<Option<JoinHandle<()>>>,
    ids: TaskIdGenerator,
}

impl TaskClient {
    /// Open the local store and start watching `connectivity`.
    pub async fn open(
        config: &ClientConfig,
        remote: Arc<dyn RemoteService>,
        connectivity: Arc<dyn ConnectivitySource>,
    ) -> SyncResult<Self> {
        config.validate()?;

        let db = Arc::new(ClientDatabase::new(&config.database_url).await?);
        db.run_migrations().await?;

        let events = Arc::new(EventDispatcher::new());
        let gateway = MutationGateway::new(db.clone(), events.clone());
        let engine = Arc::new(
            SyncEngine::new(db.clone(), remote, connectivity.clone(), events.clone())
                .with_max_attempts(config.max_attempts)
                .with_request_timeout(config.request_timeout),
        );

        let ids = TaskIdGenerator::starting_after(db.max_task_id().await?.unwrap_or(0));

        let monitor = ConnectivityMonitor::spawn(
            engine.clone(),
            connectivity.clone(),
            events.clone(),
            config.sync_interval,
        );

        tracing::info!("CLIENT: Opened task store at {}", config.database_url);

        Ok(Self {
            db,
            gateway,
            engine,
            events,
            connectivity,
            monitor: Mutex::new(Some(monitor)),
            probe: Mutex::new(None),
            ids,
        })
    }

    /// Open against a WebSocket remote, with a reachability probe driving the
    /// connectivity signals. The returned signals also accept visibility changes.
    pub async fn connect(config: &ClientConfig) -> SyncResult<(Self, ConnectivitySignals)> {
        config.validate()?;

        let probe = ReachabilityProbe::for_url(&config.server_url, config.probe_interval)?;
        let signals = ConnectivitySignals::new(probe.check().await);
        let remote = Arc::new(WebSocketRemote::new(
            config.server_url.clone(),
            config.request_timeout,
        ));

        let client = Self::open(config, remote, Arc::new(signals.clone())).await?;
        if let Ok(mut slot) = client.probe.lock() {
            *slot = Some(probe.spawn(signals.clone()));
        }

        Ok((client, signals))
    }

    // ===== Mutations =====

    pub async fn create(&self, new_task: NewTask) -> SyncResult<Task> {
        let task = self.gateway.create(new_task).await?;
        self.nudge_sync();
        Ok(task)
    }

    /// Create a task with a freshly generated id.
    pub async fn add(&self, title: &str, date: NaiveDate) -> SyncResult<Task> {
        self.create(NewTask::new(self.ids.next_id(), title, date))
            .await
    }

    pub async fn update(&self, id: TaskId, changes: TaskChanges) -> SyncResult<Task> {
        let task = self.gateway.update(id, changes).await?;
        self.nudge_sync();
        Ok(task)
    }

    pub async fn delete(&self, id: TaskId) -> SyncResult<Task> {
        let task = self.gateway.delete(id).await?;
        self.nudge_sync();
        Ok(task)
    }

    pub fn next_id(&self) -> TaskId {
        self.ids.next_id()
    }

    // Committed writes go out right away when online; offline they wait for
    // the next connectivity transition.
    fn nudge_sync(&self) {
        if !self.connectivity.is_online() {
            return;
        }
        if let Ok(monitor) = self.monitor.lock() {
            if let Some(monitor) = monitor.as_ref() {
                if let Err(e) = monitor.request_sync() {
                    tracing::debug!("CLIENT: Could not request sync: {}", e);
                }
            }
        }
    }

    // ===== Reads =====

    pub async fn get(&self, id: TaskId) -> SyncResult<Task> {
        self.gateway.get(id).await
    }

    pub async fn list_all(&self) -> SyncResult<Vec<Task>> {
        self.gateway.list_all().await
    }

    pub async fn query(&self, query: &TaskQuery) -> SyncResult<TaskPage> {
        self.gateway.query(query).await
    }

    pub async fn unsynced_count(&self) -> SyncResult<u64> {
        Ok(self.db.count_unsynced().await?.max(0) as u64)
    }

    pub async fn sync_status(&self) -> SyncResult<SyncStatusReport> {
        Ok(SyncStatusReport {
            unsynced_tasks: self.db.count_unsynced().await?.max(0) as u64,
            queued_entries: self.db.count_queue().await?.max(0) as u64,
        })
    }

    pub async fn pending_entries(&self) -> SyncResult<Vec<SyncQueueEntry>> {
        self.db.queue_entries().await
    }

    // ===== Sync =====

    pub async fn trigger_sync(&self) -> SyncResult<DrainOutcome> {
        self.engine.trigger_sync().await
    }

    pub async fn bootstrap_from_remote(&self) -> SyncResult<usize> {
        let stored = self.engine.bootstrap_from_remote().await?;
        if let Some(max_id) = self.db.max_task_id().await? {
            self.ids.advance_past(max_id);
        }
        Ok(stored)
    }

    /// Remove every task and pending sync entry.
    pub async fn clear_all(&self) -> SyncResult<()> {
        self.db.clear_all().await
    }

    pub fn is_online(&self) -> bool {
        self.connectivity.is_online()
    }

    pub fn event_dispatcher(&self) -> Arc<EventDispatcher> {
        self.events.clone()
    }

    pub fn connectivity(&self) -> Arc<dyn ConnectivitySource> {
        self.connectivity.clone()
    }

    /// Stop background work, unsubscribe from connectivity and close the store.
    pub async fn shutdown(self) {
        if let Ok(mut monitor) = self.monitor.lock() {
            if let Some(monitor) = monitor.take() {
                monitor.shutdown();
            }
        }
        if let Ok(mut probe) = self.probe.lock() {
            if let Some(probe) = probe.take() {
                probe.abort();
            }
        }
        self.db.close().await;
        tracing::info!("CLIENT: Shut down");
    }
}

impl Drop for TaskClient {
    fn drop(&mut self) {
        if let Ok(mut probe) = self.probe.lock() {
            if let Some(probe) = probe.take() {
                probe.abort();
            }
        }
    }
}
