//! In-process test server

use fakesqs_queue::{MessageBody, QueueCoordinator, QueueSettings, SqsState, Wait};
use portpicker::pick_unused_port;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::FakeSqsClient;

/// A fakesqs queue served over HTTP on a local port
///
/// Shuts down on [`TestServer::close`] or when dropped.
pub struct TestServer {
    state: Arc<SqsState>,
    port: u16,
    base_url: String,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl TestServer {
    /// Start a server on a random available port
    pub async fn start() -> Result<Self, TestError> {
        Self::start_with_visibility_timeout(Duration::from_secs(30)).await
    }

    pub async fn start_with_visibility_timeout(
        visibility_timeout: Duration,
    ) -> Result<Self, TestError> {
        let port = pick_unused_port().ok_or(TestError::NoPortAvailable)?;
        let addr = SocketAddr::from(([127, 0, 0, 1], port));
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| TestError::StartFailed(e.to_string()))?;

        let base_url = format!("http://localhost:{}", port);
        let settings = QueueSettings {
            queue_url: format!("{}/{}/{}", base_url, crate::ACCOUNT_ID, crate::QUEUE_NAME),
            visibility_timeout,
        };
        let state = Arc::new(SqsState::new(settings));
        let app = fakesqs_queue::router(state.clone());

        let (shutdown, signal) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            let server = axum::serve(listener, app).with_graceful_shutdown(async move {
                let _ = signal.await;
            });
            if let Err(e) = server.await {
                warn!(error = %e, "fakesqs test server failed");
            }
        });

        info!(port, "fakesqs test server started");
        Ok(Self {
            state,
            port,
            base_url,
            shutdown: Some(shutdown),
            task: Some(task),
        })
    }

    /// Get the base URL
    pub fn url(&self) -> &str {
        &self.base_url
    }

    /// URL of the served queue
    pub fn queue_url(&self) -> &str {
        &self.state.settings.queue_url
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Direct access to the queue behind the server
    pub fn queue(&self) -> &QueueCoordinator {
        &self.state.queue
    }

    /// Resolves once `count` messages have been sent
    pub fn wait_for_messages(&self, count: u64) -> Wait {
        self.state.queue.wait_for_sent_count(count)
    }

    /// Resolves once `count` messages have been deleted
    pub fn wait_for_deletes(&self, count: u64) -> Wait {
        self.state.queue.wait_for_deleted_count(count)
    }

    /// Resolves once the queue is empty
    pub fn wait_for_flush(&self) -> Wait {
        self.state.queue.wait_for_drain()
    }

    /// Bodies currently stored, oldest first
    pub fn get_queue(&self) -> Vec<MessageBody> {
        self.state.queue.snapshot()
    }

    /// Get a client addressing the served queue
    pub fn client(&self) -> Result<FakeSqsClient, TestError> {
        FakeSqsClient::new(self.queue_url()).map_err(|e| TestError::ClientError(e.to_string()))
    }

    /// Stop the server and wait for in-flight requests to finish
    pub async fn close(mut self) {
        info!("Stopping fakesqs test server");
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
        info!("fakesqs test server stopped");
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
    }
}

/// Errors that can occur with test server
#[derive(Debug)]
pub enum TestError {
    NoPortAvailable,
    StartFailed(String),
    ClientError(String),
}

impl std::fmt::Display for TestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TestError::NoPortAvailable => write!(f, "No available port found"),
            TestError::StartFailed(msg) => write!(f, "Failed to start server: {}", msg),
            TestError::ClientError(msg) => write!(f, "Client error: {}", msg),
        }
    }
}

impl std::error::Error for TestError {}
