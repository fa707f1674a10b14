use std::net::SocketAddr;
use std::sync::Arc;
use tasklist_server::{build_router, AppState};

pub struct TestServer {
    pub addr: SocketAddr,
    pub state: Arc<AppState>,
}

#[allow(dead_code)]
impl TestServer {
    pub fn ws_url(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }

    pub fn http_url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }
}

/// Serve the real router on an ephemeral port.
pub async fn spawn_server() -> anyhow::Result<TestServer> {
    let state = Arc::new(AppState::new());
    let app = build_router(state.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;

    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    Ok(TestServer { addr, state })
}

/// Poll `check` until it returns true or `timeout` passes.
#[allow(dead_code)]
pub async fn wait_until<F, Fut>(timeout: std::time::Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
}
