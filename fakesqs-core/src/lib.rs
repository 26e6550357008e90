//! Core types for fakesqs
//!
//! Error codes and request ids shared by the queue service and the server.

pub mod error;
pub mod request_id;

pub use error::{escape_xml, AwsError, ErrorCode};
pub use request_id::RequestId;
