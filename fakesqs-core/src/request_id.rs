//! Request ID generation

use base64::Engine;
use uuid::Uuid;

/// AWS-style request ID
#[derive(Debug, Clone)]
pub struct RequestId {
    /// Primary request ID (x-amzn-requestid)
    pub id: String,
    /// Extended request ID (x-amz-id-2), base64 encoded
    pub extended_id: String,
}

impl RequestId {
    /// Generate a new request ID pair
    pub fn new() -> Self {
        let id = Uuid::new_v4().hyphenated().to_string();
        let extended_id =
            base64::engine::general_purpose::STANDARD.encode(Uuid::new_v4().as_bytes());

        Self { id, extended_id }
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}
