use crate::{FrontierError, UrlError, UrlResult};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use url::Url;
use uuid::Uuid;

/// Kind of payload carried by a [`Message`]
///
/// Serialized as an integer on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "i32", try_from = "i32")]
pub enum MessageType {
    Null,
    FetchRequest,
    FetchResponse,
    CompositeAnalysis,
    Timer,
}

impl From<MessageType> for i32 {
    fn from(value: MessageType) -> Self {
        match value {
            MessageType::Null => 0,
            MessageType::FetchRequest => 1,
            MessageType::FetchResponse => 2,
            MessageType::CompositeAnalysis => 3,
            MessageType::Timer => 4,
        }
    }
}

impl TryFrom<i32> for MessageType {
    type Error = String;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(MessageType::Null),
            1 => Ok(MessageType::FetchRequest),
            2 => Ok(MessageType::FetchResponse),
            3 => Ok(MessageType::CompositeAnalysis),
            4 => Ok(MessageType::Timer),
            other => Err(format!("unknown message type {}", other)),
        }
    }
}

/// Transport envelope between pipeline stages
///
/// Once a message is persisted by a file queue, `id` is its on-disk entry name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub message_type: MessageType,
    #[serde(default)]
    pub message: serde_json::Value,
}

impl Message {
    /// Wraps a typed payload in a new envelope with a random id
    ///
    /// # Arguments
    ///
    /// * `message_type` - The kind of payload
    /// * `payload` - Any serializable payload
    ///
    /// # Returns
    ///
    /// * `Ok(Message)` - The envelope
    /// * `Err(serde_json::Error)` - The payload could not be serialized
    pub fn new<T: Serialize>(message_type: MessageType, payload: &T) -> serde_json::Result<Self> {
        Ok(Self {
            id: Uuid::new_v4().to_string(),
            message_type,
            message: serde_json::to_value(payload)?,
        })
    }

    /// Creates an empty timer tick
    pub fn timer() -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            message_type: MessageType::Timer,
            message: serde_json::Value::Null,
        }
    }

    /// Decodes the payload after checking the message type
    ///
    /// # Arguments
    ///
    /// * `expected` - The message type the caller is able to handle
    ///
    /// # Returns
    ///
    /// * `Ok(T)` - The decoded payload
    /// * `Err(FrontierError)` - Wrong message type or malformed payload
    pub fn decode<T: DeserializeOwned>(&self, expected: MessageType) -> Result<T, FrontierError> {
        if self.message_type != expected {
            return Err(FrontierError::UnexpectedMessage {
                expected,
                found: self.message_type,
            });
        }

        Ok(serde_json::from_value(self.message.clone())?)
    }
}

/// Transport protocol of a fetch request
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    #[default]
    Http,
}

/// A request to fetch one URI
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchRequest {
    pub request_id: Uuid,
    pub uri: String,
    pub host: String,
    #[serde(default)]
    pub origin: String,
    #[serde(default)]
    pub protocol: Protocol,
    #[serde(default)]
    pub depth: u32,
}

impl FetchRequest {
    /// Builds a request for `uri`, discovered on `origin` at `depth`
    ///
    /// # Arguments
    ///
    /// * `uri` - Absolute http(s) URI to fetch
    /// * `origin` - The URI of the page the link was found on (empty for seeds)
    /// * `depth` - Crawl depth of the new request
    ///
    /// # Returns
    ///
    /// * `Ok(FetchRequest)` - The request with a fresh request id
    /// * `Err(UrlError)` - The URI is not an absolute http(s) URL with a host
    pub fn new(uri: &str, origin: &str, depth: u32) -> UrlResult<Self> {
        let parsed = Url::parse(uri).map_err(|e| UrlError::Parse(format!("{}: {}", uri, e)))?;

        match parsed.scheme() {
            "http" | "https" => {}
            other => return Err(UrlError::InvalidScheme(other.to_string())),
        }

        let host = parsed
            .host_str()
            .ok_or_else(|| UrlError::MissingHost(uri.to_string()))?
            .to_lowercase();

        Ok(Self {
            request_id: Uuid::new_v4(),
            uri: uri.to_string(),
            host,
            origin: origin.to_string(),
            protocol: Protocol::Http,
            depth,
        })
    }

    /// Wraps the request in a message envelope
    pub fn to_message(&self) -> serde_json::Result<Message> {
        Message::new(MessageType::FetchRequest, self)
    }
}

/// Outcome of a fetch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchResponse {
    #[serde(flatten)]
    pub request: FetchRequest,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub store_key: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_sha256: Option<String>,
    #[serde(default)]
    pub elapsed_time_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub header: HashMap<String, Vec<String>>,
    #[serde(default)]
    pub http_code: u16,
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub timestamp: i64,
}

impl FetchResponse {
    /// Creates a failed response for `request`
    pub fn failure(request: FetchRequest, error: impl Into<String>) -> Self {
        Self {
            request,
            store_key: None,
            content_sha256: None,
            elapsed_time_ms: 0,
            error: Some(error.into()),
            header: HashMap::new(),
            http_code: 0,
            success: false,
            timestamp: chrono::Utc::now().timestamp(),
        }
    }
}

/// A fetch result plus everything extracted from the body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompositeAnalysis {
    #[serde(flatten)]
    pub response: FetchResponse,
    #[serde(default)]
    pub uris: Vec<String>,
    #[serde(default)]
    pub features: BTreeMap<String, serde_json::Value>,
}

impl CompositeAnalysis {
    /// The URI this analysis was produced for
    pub fn uri(&self) -> &str {
        &self.response.request.uri
    }

    /// Crawl depth of the analysed page
    pub fn depth(&self) -> u32 {
        self.response.request.depth
    }

    /// Wraps the analysis in a message envelope
    pub fn to_message(&self) -> serde_json::Result<Message> {
        Message::new(MessageType::CompositeAnalysis, self)
    }
}
