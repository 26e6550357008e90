//! SQS error types and formatting

use thiserror::Error;

/// SQS error codes returned by the query API
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    // Request shape
    MissingParameter,
    InvalidParameterValue,
    InvalidAction,

    // Batches
    EmptyBatchRequest,
    TooManyEntriesInBatchRequest,
    BatchEntryIdsNotDistinct,

    // Server side
    InternalError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MissingParameter => "MissingParameter",
            Self::InvalidParameterValue => "InvalidParameterValue",
            Self::InvalidAction => "InvalidAction",
            Self::EmptyBatchRequest => "AWS.SimpleQueueService.EmptyBatchRequest",
            Self::TooManyEntriesInBatchRequest => {
                "AWS.SimpleQueueService.TooManyEntriesInBatchRequest"
            }
            Self::BatchEntryIdsNotDistinct => "AWS.SimpleQueueService.BatchEntryIdsNotDistinct",
            Self::InternalError => "InternalError",
        }
    }

    pub fn http_status(&self) -> u16 {
        match self {
            Self::InternalError => 500,
            Self::MissingParameter
            | Self::InvalidParameterValue
            | Self::InvalidAction
            | Self::EmptyBatchRequest
            | Self::TooManyEntriesInBatchRequest
            | Self::BatchEntryIdsNotDistinct => 400,
        }
    }

    /// Fault side reported in the `<Type>` element
    pub fn fault(&self) -> &'static str {
        match self {
            Self::InternalError => "Receiver",
            _ => "Sender",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// AWS-style error
#[derive(Debug, Error)]
#[error("{code}: {message}")]
pub struct AwsError {
    pub code: ErrorCode,
    pub message: String,
    pub request_id: String,
}

impl AwsError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            request_id: crate::RequestId::new().id,
        }
    }

    pub fn missing_parameter(name: &str) -> Self {
        Self::new(
            ErrorCode::MissingParameter,
            format!("The request must contain the parameter {}.", name),
        )
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = request_id.into();
        self
    }

    /// Format as an SQS `<ErrorResponse>` document
    pub fn to_xml(&self) -> String {
        format!(
            r#"<ErrorResponse xmlns="http://queue.amazonaws.com/doc/2012-11-05/">
  <Error>
    <Type>{}</Type>
    <Code>{}</Code>
    <Message>{}</Message>
    <Detail/>
  </Error>
  <RequestId>{}</RequestId>
</ErrorResponse>"#,
            self.code.fault(),
            self.code.as_str(),
            escape_xml(&self.message),
            self.request_id
        )
    }
}

/// Escape text for inclusion in XML element content
pub fn escape_xml(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}
