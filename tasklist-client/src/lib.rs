pub mod client;
pub mod config;
pub mod connectivity;
pub mod database;
pub mod events;
pub mod gateway;
pub mod queries;
pub mod remote;
pub mod sync_engine;
pub mod websocket;

pub use client::TaskClient;
pub use config::ClientConfig;
pub use connectivity::{
    ConnectivityEvent, ConnectivityMonitor, ConnectivitySignals, ConnectivitySource,
    MonitorHandle, ReachabilityProbe, Subscription, Visibility,
};
pub use database::ClientDatabase;
pub use events::{EventDispatcher, EventType, SyncEvent};
pub use gateway::MutationGateway;
pub use remote::RemoteService;
pub use sync_engine::{DrainOutcome, DrainReport, SkipReason, SyncEngine};
pub use websocket::WebSocketRemote;

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use tasklist_core::models::{NewTask, StatusFilter, TaskQuery};

    #[tokio::test]
    async fn test_query_filters_and_paginates() {
        let db = ClientDatabase::new("sqlite::memory:").await.unwrap();
        db.run_migrations().await.unwrap();

        let june_1 = NaiveDate::from_ymd_opt(2025, 6, 1).unwrap();
        let june_2 = NaiveDate::from_ymd_opt(2025, 6, 2).unwrap();
        let titles = [
            ("Buy milk", june_1, false),
            ("Buy 100% cotton shirt", june_1, true),
            ("Walk the dog", june_2, false),
            ("Call mum", june_2, true),
            ("Pay rent", june_2, false),
        ];
        for (i, (title, date, completed)) in titles.iter().enumerate() {
            let mut new_task = NewTask::new(i as i64 + 1, *title, *date);
            new_task.completed = *completed;
            let task = new_task.into_task(1_000 + i as i64).unwrap();
            db.insert_task_and_enqueue(&task).await.unwrap();
        }

        // Newest first
        let page = db.query_tasks(&TaskQuery::default()).await.unwrap();
        assert_eq!(page.total, 5);
        assert_eq!(page.tasks[0].title, "Pay rent");

        let page = db
            .query_tasks(&TaskQuery::default().status(StatusFilter::Completed))
            .await
            .unwrap();
        assert_eq!(page.total, 2);
        assert!(page.tasks.iter().all(|t| t.completed));

        let page = db
            .query_tasks(&TaskQuery::default().on(june_1).search("BUY"))
            .await
            .unwrap();
        assert_eq!(page.total, 2);

        // LIKE wildcards in the search text are literal
        let page = db
            .query_tasks(&TaskQuery::default().search("100%"))
            .await
            .unwrap();
        assert_eq!(page.total, 1);

        let page = db
            .query_tasks(&TaskQuery::default().search("2025-06-02"))
            .await
            .unwrap();
        assert_eq!(page.total, 3);

        let page = db
            .query_tasks(&TaskQuery::default().page(2, 2))
            .await
            .unwrap();
        assert_eq!(page.total_pages, 3);
        assert_eq!(page.tasks.len(), 2);
        assert_eq!(page.tasks[0].title, "Walk the dog");
    }
}
