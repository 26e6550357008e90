//! Test utilities for fakesqs
//!
//! Runs a fakesqs queue inside the test process:
//! - Start/stop the server on a random port
//! - Wait for sends, deletes, or an empty queue
//! - Inspect stored messages without receiving them
//! - Client helpers speaking the SQS query protocol
//!
//! ## Usage
//!
//! ```rust,no_run
//! use fakesqs_test::TestServer;
//!
//! #[tokio::test]
//! async fn test_worker_drains_queue() {
//!     let server = TestServer::start().await.unwrap();
//!     let client = server.client().unwrap();
//!
//!     client.send_message("job").await.unwrap();
//!     server.wait_for_messages(1).await;
//!
//!     // ... run the code under test against server.queue_url() ...
//!
//!     server.wait_for_flush().await;
//!     server.close().await;
//! }
//! ```

pub mod client;
pub mod server;

pub use client::{ClientError, FakeSqsClient, SentMessage, SqsMessage};
pub use server::{TestError, TestServer};

/// Account id used in test queue URLs
pub const ACCOUNT_ID: &str = "000000000000";

/// Queue name used in test queue URLs
pub const QUEUE_NAME: &str = "fakesqs";
