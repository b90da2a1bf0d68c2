use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Request {
    pub jsonrpc: String,
    pub id: i64,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl Request {
    pub fn new(id: i64, method: &str, params: Option<Value>) -> Self {
        Request {
            jsonrpc: "2.0".to_string(),
            id,
            method: method.to_string(),
            params,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Notification {
    pub jsonrpc: String,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl Notification {
    pub fn new(method: &str, params: Option<Value>) -> Self {
        Notification {
            jsonrpc: "2.0".to_string(),
            method: method.to_string(),
            params,
        }
    }
}

/// Successful reply. The id is kept as a raw JSON value so that a server
/// answering with the wrong id type surfaces as a protocol error during
/// correlation instead of a deserialization failure.
#[derive(Deserialize, Debug)]
pub struct ResponseMessage {
    pub jsonrpc: String,
    pub id: Value,
    #[serde(default)]
    pub result: Value,
}

#[derive(Deserialize, Debug)]
pub struct ResponseError {
    pub jsonrpc: String,
    pub id: Value,
    pub error: ErrorObject,
}

#[derive(Deserialize, Debug)]
pub struct ErrorObject {
    pub code: i64,
    pub message: String,
    #[serde(default)]
    pub data: Option<Value>,
}

/// One incoming message, classified.
#[derive(Debug)]
pub enum Message {
    Response(ResponseMessage),
    Error(ResponseError),
    Notification(Notification),
}
