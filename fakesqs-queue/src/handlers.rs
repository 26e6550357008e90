//! HTTP handlers for the SQS query protocol

use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::Response,
    routing::post,
    Router,
};
use bytes::Bytes;
use fakesqs_core::{escape_xml, AwsError, ErrorCode, RequestId};
use md5::{Digest, Md5};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::coordinator::{QueueCoordinator, QueueError};
use crate::store::{MessageAttribute, MessageBody};

/// Entries accepted per batch request.
pub const MAX_BATCH_ENTRIES: usize = 10;
/// Message attributes accepted per message.
pub const MAX_MESSAGE_ATTRIBUTES: usize = 10;
/// Messages returned per receive call.
pub const MAX_RECEIVE_MESSAGES: usize = 10;
/// Longest visibility timeout SQS accepts (12 hours).
pub const MAX_VISIBILITY_TIMEOUT_SECS: f64 = 43_200.0;

const XMLNS: &str = "http://queue.amazonaws.com/doc/2012-11-05/";

/// Settings the adapter needs besides the queue itself
#[derive(Debug, Clone)]
pub struct QueueSettings {
    pub queue_url: String,
    pub visibility_timeout: Duration,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            queue_url: "http://localhost:4576/000000000000/fakesqs".to_string(),
            visibility_timeout: Duration::from_secs(30),
        }
    }
}

/// State for SQS handlers
#[derive(Default)]
pub struct SqsState {
    pub queue: QueueCoordinator,
    pub settings: QueueSettings,
}

impl SqsState {
    pub fn new(settings: QueueSettings) -> Self {
        Self {
            queue: QueueCoordinator::new(),
            settings,
        }
    }
}

/// Supported query actions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqsAction {
    SendMessage,
    SendMessageBatch,
    ReceiveMessage,
    DeleteMessage,
    DeleteMessageBatch,
    GetQueueUrl,
    GetQueueAttributes,
}

impl SqsAction {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "SendMessage" => Some(Self::SendMessage),
            "SendMessageBatch" => Some(Self::SendMessageBatch),
            "ReceiveMessage" => Some(Self::ReceiveMessage),
            "DeleteMessage" => Some(Self::DeleteMessage),
            "DeleteMessageBatch" => Some(Self::DeleteMessageBatch),
            "GetQueueUrl" => Some(Self::GetQueueUrl),
            "GetQueueAttributes" => Some(Self::GetQueueAttributes),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SendMessage => "SendMessage",
            Self::SendMessageBatch => "SendMessageBatch",
            Self::ReceiveMessage => "ReceiveMessage",
            Self::DeleteMessage => "DeleteMessage",
            Self::DeleteMessageBatch => "DeleteMessageBatch",
            Self::GetQueueUrl => "GetQueueUrl",
            Self::GetQueueAttributes => "GetQueueAttributes",
        }
    }
}

/// Router accepting queue requests on `/` and on any queue URL path
pub fn router(state: Arc<SqsState>) -> Router {
    Router::new()
        .route("/", post(handle_request))
        .route("/*queue_path", post(handle_request))
        .with_state(state)
}

/// Handle SQS requests based on the `Action` parameter or X-Amz-Target header
pub async fn handle_request(
    State(state): State<Arc<SqsState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let params: Params = form_urlencoded::parse(&body).into_owned().collect();

    let action_name = params
        .get("Action")
        .map(String::as_str)
        .or_else(|| {
            headers
                .get("x-amz-target")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.strip_prefix("AmazonSQS."))
        })
        .unwrap_or("");

    let request_id = RequestId::new();

    let Some(action) = SqsAction::parse(action_name) else {
        warn!(action = %action_name, "Unknown SQS action");
        return error_response(
            AwsError::new(
                ErrorCode::InvalidAction,
                format!("The action {} is not valid for this endpoint.", action_name),
            ),
            &request_id,
        );
    };

    info!(action = action.as_str(), request_id = %request_id.id, "SQS request");

    let result = match action {
        SqsAction::SendMessage => handle_send_message(&state, &params),
        SqsAction::SendMessageBatch => handle_send_message_batch(&state, &params),
        SqsAction::ReceiveMessage => handle_receive_message(&state, &params),
        SqsAction::DeleteMessage => handle_delete_message(&state, &params),
        SqsAction::DeleteMessageBatch => handle_delete_message_batch(&state, &params),
        SqsAction::GetQueueUrl => Ok(handle_get_queue_url(&state)),
        SqsAction::GetQueueAttributes => Ok(handle_get_queue_attributes(&state)),
    };

    match result {
        Ok(inner) => xml_response(
            StatusCode::OK,
            &wrap_response(action, &inner, &request_id.id),
            &request_id,
        ),
        Err(e) => error_response(e, &request_id),
    }
}

// === Parameter helpers ===

type Params = HashMap<String, String>;

fn required<'a>(params: &'a Params, name: &str) -> Result<&'a str, AwsError> {
    params
        .get(name)
        .map(String::as_str)
        .ok_or_else(|| AwsError::missing_parameter(name))
}

/// Collect `{prefix}MessageAttribute.N.*` entries.
fn message_attributes(params: &Params, prefix: &str) -> BTreeMap<String, MessageAttribute> {
    let mut attributes = BTreeMap::new();
    for i in 1..=MAX_MESSAGE_ATTRIBUTES {
        let key = format!("{}MessageAttribute.{}", prefix, i);
        let Some(name) = params.get(&format!("{}.Name", key)) else {
            continue;
        };
        let string_value = params
            .get(&format!("{}.Value.StringValue", key))
            .cloned()
            .unwrap_or_default();
        let data_type = params
            .get(&format!("{}.Value.DataType", key))
            .cloned()
            .unwrap_or_else(|| "String".to_string());

        attributes.insert(
            name.clone(),
            MessageAttribute {
                data_type,
                string_value,
            },
        );
    }
    attributes
}

/// Collect numbered batch entries `{entry}.N.{field}` for every N that
/// carries all `fields`.
fn batch_entries(
    params: &Params,
    entry: &str,
    fields: &[&str],
) -> Result<Vec<(usize, Vec<String>)>, AwsError> {
    let prefix = format!("{}.", entry);
    let over_limit = params
        .keys()
        .filter_map(|key| key.strip_prefix(prefix.as_str()))
        .filter_map(|rest| rest.split('.').next())
        .filter_map(|index| index.parse::<usize>().ok())
        .any(|index| index > MAX_BATCH_ENTRIES);
    if over_limit {
        return Err(AwsError::new(
            ErrorCode::TooManyEntriesInBatchRequest,
            format!("Maximum number of entries per request are {}.", MAX_BATCH_ENTRIES),
        ));
    }

    let mut entries = Vec::new();
    for i in 1..=MAX_BATCH_ENTRIES {
        let values: Option<Vec<String>> = fields
            .iter()
            .map(|field| params.get(&format!("{}.{}.{}", entry, i, field)).cloned())
            .collect();
        if let Some(values) = values {
            entries.push((i, values));
        }
    }

    if entries.is_empty() {
        return Err(AwsError::new(
            ErrorCode::EmptyBatchRequest,
            "There should be at least one entry in the request.",
        ));
    }

    let mut ids = HashSet::new();
    if !entries.iter().all(|(_, values)| ids.insert(values[0].as_str())) {
        return Err(AwsError::new(
            ErrorCode::BatchEntryIdsNotDistinct,
            "Two or more batch entries in the request have the same Id.",
        ));
    }

    Ok(entries)
}

fn internal_error(e: QueueError) -> AwsError {
    error!(error = %e, "Queue invariant violated");
    AwsError::new(ErrorCode::InternalError, e.to_string())
}

pub fn md5_hex(input: &str) -> String {
    let mut hasher = Md5::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}

// === Handlers ===

fn handle_send_message(state: &SqsState, params: &Params) -> Result<String, AwsError> {
    let body = required(params, "MessageBody")?;
    let message = MessageBody {
        body: body.to_string(),
        attributes: message_attributes(params, ""),
    };

    let id = state.queue.send(message).map_err(internal_error)?;

    Ok(format!(
        "<SendMessageResult><MD5OfMessageBody>{}</MD5OfMessageBody><MessageId>{}</MessageId></SendMessageResult>",
        md5_hex(body),
        id
    ))
}

fn handle_send_message_batch(state: &SqsState, params: &Params) -> Result<String, AwsError> {
    let entries = batch_entries(params, "SendMessageBatchRequestEntry", &["Id", "MessageBody"])?;

    let bodies = entries
        .iter()
        .map(|(i, values)| MessageBody {
            body: values[1].clone(),
            attributes: message_attributes(
                params,
                &format!("SendMessageBatchRequestEntry.{}.", i),
            ),
        })
        .collect();
    let ids = state.queue.send_batch(bodies).map_err(internal_error)?;

    let mut xml = String::from("<SendMessageBatchResult>");
    for ((_, values), id) in entries.iter().zip(ids) {
        xml.push_str(&format!(
            "<SendMessageBatchResultEntry><Id>{}</Id><MessageId>{}</MessageId><MD5OfMessageBody>{}</MD5OfMessageBody></SendMessageBatchResultEntry>",
            escape_xml(&values[0]),
            id,
            md5_hex(&values[1])
        ));
    }
    xml.push_str("</SendMessageBatchResult>");
    Ok(xml)
}

fn handle_receive_message(state: &SqsState, params: &Params) -> Result<String, AwsError> {
    let max_messages = match params.get("MaxNumberOfMessages") {
        None => 1,
        Some(raw) => raw
            .parse::<usize>()
            .ok()
            .filter(|n| (1..=MAX_RECEIVE_MESSAGES).contains(n))
            .ok_or_else(|| {
                AwsError::new(
                    ErrorCode::InvalidParameterValue,
                    format!(
                        "Value {} for parameter MaxNumberOfMessages is invalid. Reason: Must be between 1 and {}.",
                        raw, MAX_RECEIVE_MESSAGES
                    ),
                )
            })?,
    };

    let visibility_timeout = match params.get("VisibilityTimeout") {
        None => state.settings.visibility_timeout,
        Some(raw) => raw
            .parse::<f64>()
            .ok()
            .filter(|secs| (0.0..=MAX_VISIBILITY_TIMEOUT_SECS).contains(secs))
            .map(Duration::from_secs_f64)
            .ok_or_else(|| {
                AwsError::new(
                    ErrorCode::InvalidParameterValue,
                    format!("Value {} for parameter VisibilityTimeout is invalid.", raw),
                )
            })?,
    };

    let messages = state.queue.receive(max_messages, visibility_timeout);

    let mut xml = String::from("<ReceiveMessageResult>");
    for msg in messages {
        let handle = msg.receipt_handle();
        xml.push_str("<Message>");
        xml.push_str(&format!("<MessageId>{}</MessageId>", handle));
        xml.push_str(&format!("<ReceiptHandle>{}</ReceiptHandle>", handle));
        xml.push_str(&format!("<MD5OfBody>{}</MD5OfBody>", md5_hex(&msg.body.body)));
        xml.push_str(&format!("<Body>{}</Body>", escape_xml(&msg.body.body)));
        xml.push_str(&attribute_xml(
            "ApproximateReceiveCount",
            &msg.receive_count.to_string(),
        ));
        xml.push_str(&attribute_xml("SentTimestamp", &msg.sent_at.to_string()));
        for (name, attribute) in &msg.body.attributes {
            xml.push_str(&format!(
                "<MessageAttribute><Name>{}</Name><Value><StringValue>{}</StringValue><DataType>{}</DataType></Value></MessageAttribute>",
                escape_xml(name),
                escape_xml(&attribute.string_value),
                escape_xml(&attribute.data_type)
            ));
        }
        xml.push_str("</Message>");
    }
    xml.push_str("</ReceiveMessageResult>");
    Ok(xml)
}

fn handle_delete_message(state: &SqsState, params: &Params) -> Result<String, AwsError> {
    let receipt_handle = required(params, "ReceiptHandle")?;

    // Unknown handles are acknowledged like known ones.
    state.queue.delete(receipt_handle).map_err(internal_error)?;
    Ok(String::new())
}

fn handle_delete_message_batch(state: &SqsState, params: &Params) -> Result<String, AwsError> {
    let entries = batch_entries(
        params,
        "DeleteMessageBatchRequestEntry",
        &["Id", "ReceiptHandle"],
    )?;

    let handles: Vec<&str> = entries.iter().map(|(_, values)| values[1].as_str()).collect();
    state.queue.delete_batch(&handles[..]).map_err(internal_error)?;

    let mut xml = String::from("<DeleteMessageBatchResult>");
    for (_, values) in &entries {
        xml.push_str(&format!(
            "<DeleteMessageBatchResultEntry><Id>{}</Id></DeleteMessageBatchResultEntry>",
            escape_xml(&values[0])
        ));
    }
    xml.push_str("</DeleteMessageBatchResult>");
    Ok(xml)
}

fn handle_get_queue_url(state: &SqsState) -> String {
    format!(
        "<GetQueueUrlResult><QueueUrl>{}</QueueUrl></GetQueueUrlResult>",
        escape_xml(&state.settings.queue_url)
    )
}

fn handle_get_queue_attributes(state: &SqsState) -> String {
    let attributes = state.queue.attributes();
    let mut xml = String::from("<GetQueueAttributesResult>");
    xml.push_str(&attribute_xml(
        "ApproximateNumberOfMessages",
        &attributes.visible.to_string(),
    ));
    xml.push_str(&attribute_xml(
        "ApproximateNumberOfMessagesNotVisible",
        &attributes.in_flight.to_string(),
    ));
    xml.push_str(&attribute_xml("ApproximateNumberOfMessagesDelayed", "0"));
    xml.push_str(&attribute_xml(
        "VisibilityTimeout",
        &state.settings.visibility_timeout.as_secs_f64().to_string(),
    ));
    xml.push_str("</GetQueueAttributesResult>");
    xml
}

// === XML Helpers ===

fn attribute_xml(name: &str, value: &str) -> String {
    format!(
        "<Attribute><Name>{}</Name><Value>{}</Value></Attribute>",
        name,
        escape_xml(value)
    )
}

fn wrap_response(action: SqsAction, inner: &str, request_id: &str) -> String {
    format!(
        r#"<{action}Response xmlns="{xmlns}">{inner}<ResponseMetadata><RequestId>{request_id}</RequestId></ResponseMetadata></{action}Response>"#,
        action = action.as_str(),
        xmlns = XMLNS,
        inner = inner,
        request_id = request_id
    )
}

fn xml_response(status: StatusCode, body: &str, request_id: &RequestId) -> Response {
    let mut response = Response::new(Body::from(body.to_string()));
    *response.status_mut() = status;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        header::HeaderValue::from_static("text/xml"),
    );
    if let Ok(value) = header::HeaderValue::from_str(&request_id.id) {
        response.headers_mut().insert("x-amzn-requestid", value);
    }
    if let Ok(value) = header::HeaderValue::from_str(&request_id.extended_id) {
        response.headers_mut().insert("x-amz-id-2", value);
    }
    response
}

fn error_response(error: AwsError, request_id: &RequestId) -> Response {
    let error = error.with_request_id(request_id.id.clone());
    let status =
        StatusCode::from_u16(error.code.http_status()).unwrap_or(StatusCode::BAD_REQUEST);
    xml_response(status, &error.to_xml(), request_id)
}
