//! Client for talking to a fakesqs queue over the query protocol

use reqwest::Client;
use std::collections::BTreeMap;

/// Client for one fakesqs queue
pub struct FakeSqsClient {
    queue_url: String,
    client: Client,
}

impl FakeSqsClient {
    /// Create a new client
    pub fn new(queue_url: impl Into<String>) -> Result<Self, ClientError> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()?;

        Ok(Self {
            queue_url: queue_url.into(),
            client,
        })
    }

    pub fn queue_url(&self) -> &str {
        &self.queue_url
    }

    /// Send a message
    pub async fn send_message(&self, body: &str) -> Result<SentMessage, ClientError> {
        self.send_message_with_attributes(body, &[]).await
    }

    /// Send a message carrying string attributes
    pub async fn send_message_with_attributes(
        &self,
        body: &str,
        attributes: &[(&str, &str)],
    ) -> Result<SentMessage, ClientError> {
        let mut form = vec![
            ("Action".to_string(), "SendMessage".to_string()),
            ("MessageBody".to_string(), body.to_string()),
        ];
        for (i, (name, value)) in attributes.iter().enumerate() {
            let prefix = format!("MessageAttribute.{}", i + 1);
            form.push((format!("{}.Name", prefix), (*name).to_string()));
            form.push((format!("{}.Value.StringValue", prefix), (*value).to_string()));
            form.push((format!("{}.Value.DataType", prefix), "String".to_string()));
        }

        let text = self.call(&form).await?;
        Ok(SentMessage {
            message_id: required(&text, "MessageId")?,
            md5_of_body: required(&text, "MD5OfMessageBody")?,
        })
    }

    /// Send a batch of `(id, body)` entries; returns message ids in entry order
    pub async fn send_message_batch(
        &self,
        entries: &[(&str, &str)],
    ) -> Result<Vec<String>, ClientError> {
        let mut form = vec![("Action".to_string(), "SendMessageBatch".to_string())];
        for (i, (id, body)) in entries.iter().enumerate() {
            let prefix = format!("SendMessageBatchRequestEntry.{}", i + 1);
            form.push((format!("{}.Id", prefix), (*id).to_string()));
            form.push((format!("{}.MessageBody", prefix), (*body).to_string()));
        }

        let text = self.call(&form).await?;
        Ok(elements(&text, "SendMessageBatchResultEntry")
            .filter_map(|entry| extract_xml_value(entry, "MessageId"))
            .collect())
    }

    /// Receive up to `max` messages, optionally overriding the visibility timeout
    pub async fn receive_messages(
        &self,
        max: u32,
        visibility_timeout: Option<f64>,
    ) -> Result<Vec<SqsMessage>, ClientError> {
        let mut form = vec![
            ("Action".to_string(), "ReceiveMessage".to_string()),
            ("MaxNumberOfMessages".to_string(), max.to_string()),
        ];
        if let Some(secs) = visibility_timeout {
            form.push(("VisibilityTimeout".to_string(), secs.to_string()));
        }

        let text = self.call(&form).await?;
        elements(&text, "Message").map(parse_message).collect()
    }

    /// Delete a message by receipt handle
    pub async fn delete_message(&self, receipt_handle: &str) -> Result<(), ClientError> {
        let form = vec![
            ("Action".to_string(), "DeleteMessage".to_string()),
            ("ReceiptHandle".to_string(), receipt_handle.to_string()),
        ];
        self.call(&form).await?;
        Ok(())
    }

    async fn call(&self, form: &[(String, String)]) -> Result<String, ClientError> {
        let response = self
            .client
            .post(&self.queue_url)
            .header("Content-Type", "application/x-www-form-urlencoded")
            .form(form)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(ClientError::ServiceError {
                status: status.as_u16(),
                code: extract_xml_value(&text, "Code").unwrap_or_default(),
                message: extract_xml_value(&text, "Message").unwrap_or_default(),
            });
        }
        Ok(text)
    }
}

/// Result of a successful send
#[derive(Debug, Clone)]
pub struct SentMessage {
    pub message_id: String,
    pub md5_of_body: String,
}

/// A received SQS message
#[derive(Debug, Clone)]
pub struct SqsMessage {
    pub message_id: String,
    pub receipt_handle: String,
    pub body: String,
    pub md5_of_body: String,
    pub receive_count: u32,
    /// Message attributes by name (string values)
    pub attributes: BTreeMap<String, String>,
}

fn parse_message(xml: &str) -> Result<SqsMessage, ClientError> {
    let mut attributes = BTreeMap::new();
    for attribute in elements(xml, "MessageAttribute") {
        if let (Some(name), Some(value)) = (
            extract_xml_value(attribute, "Name"),
            extract_xml_value(attribute, "StringValue"),
        ) {
            attributes.insert(name, value);
        }
    }

    let receive_count = elements(xml, "Attribute")
        .find(|a| extract_xml_value(a, "Name").as_deref() == Some("ApproximateReceiveCount"))
        .and_then(|a| extract_xml_value(a, "Value"))
        .and_then(|v| v.parse().ok())
        .unwrap_or_default();

    Ok(SqsMessage {
        message_id: required(xml, "MessageId")?,
        receipt_handle: required(xml, "ReceiptHandle")?,
        body: required(xml, "Body")?,
        md5_of_body: required(xml, "MD5OfBody")?,
        receive_count,
        attributes,
    })
}

/// Iterate the raw contents of every `<tag>...</tag>` element
fn elements<'a>(xml: &'a str, tag: &str) -> impl Iterator<Item = &'a str> + 'a {
    let open_tag = format!("<{}>", tag);
    let close_tag = format!("</{}>", tag);
    let mut rest = xml;

    std::iter::from_fn(move || {
        let start = rest.find(&open_tag)? + open_tag.len();
        let end = rest[start..].find(&close_tag)?;
        let content = &rest[start..start + end];
        rest = &rest[start + end + close_tag.len()..];
        Some(content)
    })
}

/// Helper to extract a value from XML
fn extract_xml_value(xml: &str, tag: &str) -> Option<String> {
    elements(xml, tag).next().map(unescape_xml)
}

fn required(xml: &str, tag: &str) -> Result<String, ClientError> {
    extract_xml_value(xml, tag)
        .ok_or_else(|| ClientError::ParseError(format!("Missing <{}> in response", tag)))
}

fn unescape_xml(s: &str) -> String {
    s.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

/// Client errors
#[derive(Debug)]
pub enum ClientError {
    RequestError(reqwest::Error),
    ServiceError {
        status: u16,
        code: String,
        message: String,
    },
    ParseError(String),
}

impl std::fmt::Display for ClientError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClientError::RequestError(e) => write!(f, "Request error: {}", e),
            ClientError::ServiceError {
                status,
                code,
                message,
            } => write!(f, "Service error {} {}: {}", status, code, message),
            ClientError::ParseError(e) => write!(f, "Parse error: {}", e),
        }
    }
}

impl std::error::Error for ClientError {}

impl From<reqwest::Error> for ClientError {
    fn from(e: reqwest::Error) -> Self {
        ClientError::RequestError(e)
    }
}
