use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tasklist_client::{
    ClientDatabase, ConnectivitySignals, EventDispatcher, MutationGateway, RemoteService,
    SyncEngine,
};
use tasklist_core::{
    errors::ClientError,
    models::{NewTask, Task, TaskId},
    SyncResult,
};

/// Creates a new in-memory test sqlite database and runs migrations.
#[allow(dead_code)]
pub async fn setup_test_db() -> Arc<ClientDatabase> {
    let db = ClientDatabase::new("sqlite::memory:").await.unwrap();
    db.run_migrations().await.unwrap();
    Arc::new(db)
}

#[allow(dead_code)]
pub fn june(day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 6, day).unwrap()
}

#[allow(dead_code)]
pub fn make_task(id: TaskId, title: &str) -> NewTask {
    NewTask::new(id, title, june(1))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteCall {
    Upsert(Task),
    Delete(TaskId),
    FetchAll,
}

#[allow(dead_code)]
impl RemoteCall {
    pub fn task_id(&self) -> Option<TaskId> {
        match self {
            RemoteCall::Upsert(task) => Some(task.id),
            RemoteCall::Delete(id) => Some(*id),
            RemoteCall::FetchAll => None,
        }
    }
}

type CallHook = Box<dyn Fn(&RemoteCall) + Send + Sync>;

/// Scriptable in-memory remote that records every call.
#[derive(Default)]
pub struct MockRemote {
    calls: Mutex<Vec<RemoteCall>>,
    tasks: Mutex<BTreeMap<TaskId, Task>>,
    /// Remaining failures per task id.
    failures: Mutex<HashMap<TaskId, usize>>,
    fail_everything: Mutex<bool>,
    delay: Mutex<Option<Duration>>,
    on_call: Mutex<Option<CallHook>>,
}

#[allow(dead_code)]
impl MockRemote {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_tasks(tasks: Vec<Task>) -> Arc<Self> {
        let remote = Self::default();
        *remote.tasks.lock().unwrap() = tasks.into_iter().map(|t| (t.id, t)).collect();
        Arc::new(remote)
    }

    /// Fail the next `times` calls touching `task_id`.
    pub fn fail_task(&self, task_id: TaskId, times: usize) {
        self.failures.lock().unwrap().insert(task_id, times);
    }

    pub fn fail_everything(&self, fail: bool) {
        *self.fail_everything.lock().unwrap() = fail;
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    pub fn on_call(&self, hook: impl Fn(&RemoteCall) + Send + Sync + 'static) {
        *self.on_call.lock().unwrap() = Some(Box::new(hook));
    }

    pub fn calls(&self) -> Vec<RemoteCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn stored(&self) -> BTreeMap<TaskId, Task> {
        self.tasks.lock().unwrap().clone()
    }

    async fn handle(&self, call: RemoteCall) -> SyncResult<()> {
        self.calls.lock().unwrap().push(call.clone());
        if let Some(hook) = self.on_call.lock().unwrap().as_ref() {
            hook(&call);
        }

        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let should_fail = {
            if *self.fail_everything.lock().unwrap() {
                true
            } else {
                let mut failures = self.failures.lock().unwrap();
                match call.task_id().and_then(|id| failures.get_mut(&id)) {
                    Some(remaining) if *remaining > 0 => {
                        *remaining -= 1;
                        true
                    }
                    _ => false,
                }
            }
        };
        if should_fail {
            return Err(ClientError::WebSocket("scripted failure".into()).into());
        }

        let mut tasks = self.tasks.lock().unwrap();
        match call {
            RemoteCall::Upsert(task) => {
                tasks.insert(task.id, task);
            }
            RemoteCall::Delete(id) => {
                tasks.remove(&id);
            }
            RemoteCall::FetchAll => {}
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteService for MockRemote {
    async fn upsert(&self, task: &Task) -> SyncResult<()> {
        self.handle(RemoteCall::Upsert(task.clone())).await
    }

    async fn delete(&self, id: TaskId) -> SyncResult<()> {
        self.handle(RemoteCall::Delete(id)).await
    }

    async fn fetch_all(&self) -> SyncResult<Vec<Task>> {
        self.handle(RemoteCall::FetchAll).await?;
        Ok(self.tasks.lock().unwrap().values().cloned().collect())
    }
}

/// Everything needed to drive the engine by hand.
#[allow(dead_code)]
pub struct Harness {
    pub db: Arc<ClientDatabase>,
    pub remote: Arc<MockRemote>,
    pub signals: ConnectivitySignals,
    pub events: Arc<EventDispatcher>,
    pub gateway: MutationGateway,
    pub engine: Arc<SyncEngine>,
}

#[allow(dead_code)]
pub async fn harness(online: bool) -> Harness {
    harness_with(online, MockRemote::new(), Duration::from_secs(5)).await
}

#[allow(dead_code)]
pub async fn harness_with(
    online: bool,
    remote: Arc<MockRemote>,
    request_timeout: Duration,
) -> Harness {
    let db = setup_test_db().await;
    let signals = ConnectivitySignals::new(online);
    let events = Arc::new(EventDispatcher::new());
    let gateway = MutationGateway::new(db.clone(), events.clone());
    let engine = Arc::new(
        SyncEngine::new(
            db.clone(),
            remote.clone(),
            Arc::new(signals.clone()),
            events.clone(),
        )
        .with_request_timeout(request_timeout),
    );

    Harness {
        db,
        remote,
        signals,
        events,
        gateway,
        engine,
    }
}

/// Poll `check` until it returns true or `timeout` passes.
#[allow(dead_code)]
pub async fn wait_until<F, Fut>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
