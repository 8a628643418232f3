//! Call contexts handed to tool handlers.
//!
//! [`CallContext`] is the surface shared by tool invocations and plain HTTP
//! requests, so the same helper code can serve both. Members that make no
//! sense for a tool invocation fail with [`ContextError::Unsupported`]
//! instead of returning empty data.

use super::session::SessionAccess;
use axum::body::Bytes;
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use axum::Json;
use mcp_bridge_types::CallToolResult;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::sync::Arc;

/// Error type for argument access.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ArgumentError {
    #[error("missing required argument '{key}'")]
    Missing { key: String },

    #[error("argument '{key}' must be of type {expected}")]
    TypeMismatch { key: String, expected: &'static str },

    #[error("invalid arguments: {0}")]
    Invalid(String),
}

/// Error type for context members a caller cannot use.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ContextError {
    #[error("{operation} is not available inside a tool call")]
    Unsupported { operation: &'static str },
}

/// Capabilities shared by every kind of call.
pub trait CallContext: Send + Sync {
    /// Arguments of the call as a JSON object.
    fn arguments(&self) -> &Map<String, Value>;

    /// Session data of the calling client.
    fn session(&self) -> &SessionAccess;

    /// Set the call's result. The last call wins.
    fn respond(&self, result: CallToolResult);

    /// Raw request headers.
    fn request_headers(&self) -> Result<&HeaderMap, ContextError>;

    /// Raw request body.
    fn request_body(&self) -> Result<&Bytes, ContextError>;

    /// Replace the response with a raw body, bypassing the result.
    fn write_raw_response(&self, body: Bytes) -> Result<(), ContextError>;

    fn respond_text(&self, text: impl Into<String>)
    where
        Self: Sized,
    {
        self.respond(CallToolResult::text(text));
    }

    fn respond_error(&self, message: impl Into<String>)
    where
        Self: Sized,
    {
        self.respond(CallToolResult::error(message));
    }

    fn respond_structured(&self, value: Value) {
        self.respond(CallToolResult::structured(value));
    }

    fn get_string(&self, key: &str) -> Option<&str> {
        self.arguments().get(key).and_then(Value::as_str)
    }

    fn get_int(&self, key: &str) -> Option<i32> {
        self.get_long(key).and_then(|n| i32::try_from(n).ok())
    }

    fn get_long(&self, key: &str) -> Option<i64> {
        self.arguments().get(key).and_then(Value::as_i64)
    }

    fn get_double(&self, key: &str) -> Option<f64> {
        self.arguments().get(key).and_then(Value::as_f64)
    }

    fn get_bool(&self, key: &str) -> Option<bool> {
        self.arguments().get(key).and_then(Value::as_bool)
    }

    /// A list of strings. Any non-string element makes the whole value absent.
    fn get_string_list(&self, key: &str) -> Option<Vec<String>> {
        self.arguments()
            .get(key)
            .and_then(Value::as_array)?
            .iter()
            .map(|v| v.as_str().map(str::to_string))
            .collect()
    }

    fn get_object(&self, key: &str) -> Option<&Map<String, Value>> {
        self.arguments().get(key).and_then(Value::as_object)
    }

    fn require_string(&self, key: &str) -> Result<&str, ArgumentError> {
        let found = self.get_string(key);
        require(self.arguments(), key, "string", found)
    }

    fn require_int(&self, key: &str) -> Result<i32, ArgumentError> {
        require(self.arguments(), key, "int", self.get_int(key))
    }

    fn require_long(&self, key: &str) -> Result<i64, ArgumentError> {
        require(self.arguments(), key, "long", self.get_long(key))
    }

    fn require_double(&self, key: &str) -> Result<f64, ArgumentError> {
        require(self.arguments(), key, "double", self.get_double(key))
    }

    fn require_bool(&self, key: &str) -> Result<bool, ArgumentError> {
        require(self.arguments(), key, "boolean", self.get_bool(key))
    }

    fn require_string_list(&self, key: &str) -> Result<Vec<String>, ArgumentError> {
        require(
            self.arguments(),
            key,
            "string list",
            self.get_string_list(key),
        )
    }

    fn require_object(&self, key: &str) -> Result<&Map<String, Value>, ArgumentError> {
        let found = self.get_object(key);
        require(self.arguments(), key, "object", found)
    }

    /// Deserialize the whole argument object.
    fn argument<T: DeserializeOwned>(&self) -> Result<T, ArgumentError>
    where
        Self: Sized,
    {
        serde_json::from_value(Value::Object(self.arguments().clone()))
            .map_err(|e| ArgumentError::Invalid(e.to_string()))
    }
}

/// Distinguish a missing argument from one of the wrong type.
fn require<T>(
    arguments: &Map<String, Value>,
    key: &str,
    expected: &'static str,
    found: Option<T>,
) -> Result<T, ArgumentError> {
    match found {
        Some(value) => Ok(value),
        None => match arguments.get(key) {
            None | Some(Value::Null) => Err(ArgumentError::Missing {
                key: key.to_string(),
            }),
            Some(_) => Err(ArgumentError::TypeMismatch {
                key: key.to_string(),
                expected,
            }),
        },
    }
}

/// Context for one `tools/call` invocation.
///
/// Cheap to clone; clones share the result slot.
#[derive(Debug, Clone)]
pub struct ToolCallContext {
    tool_name: Arc<str>,
    arguments: Arc<Map<String, Value>>,
    session: SessionAccess,
    result: Arc<Mutex<Option<CallToolResult>>>,
}

impl ToolCallContext {
    pub fn new(tool_name: &str, arguments: Map<String, Value>, session: SessionAccess) -> Self {
        Self {
            tool_name: Arc::from(tool_name),
            arguments: Arc::new(arguments),
            session,
            result: Arc::new(Mutex::new(None)),
        }
    }

    /// Name of the tool being invoked.
    pub fn tool_name(&self) -> &str {
        &self.tool_name
    }

    /// Take the assigned result, leaving the slot empty.
    pub fn take_result(&self) -> Option<CallToolResult> {
        self.result.lock().take()
    }
}

impl CallContext for ToolCallContext {
    fn arguments(&self) -> &Map<String, Value> {
        &self.arguments
    }

    fn session(&self) -> &SessionAccess {
        &self.session
    }

    fn respond(&self, result: CallToolResult) {
        *self.result.lock() = Some(result);
    }

    fn request_headers(&self) -> Result<&HeaderMap, ContextError> {
        Err(ContextError::Unsupported {
            operation: "request header access",
        })
    }

    fn request_body(&self) -> Result<&Bytes, ContextError> {
        Err(ContextError::Unsupported {
            operation: "request body access",
        })
    }

    fn write_raw_response(&self, _body: Bytes) -> Result<(), ContextError> {
        Err(ContextError::Unsupported {
            operation: "raw response writing",
        })
    }
}

/// Context for a plain HTTP request, so helpers written against
/// [`CallContext`] can also back ordinary routes.
///
/// A JSON object body becomes the argument object; any other body leaves the
/// arguments empty.
#[derive(Debug)]
pub struct HttpCallContext {
    headers: HeaderMap,
    body: Bytes,
    arguments: Map<String, Value>,
    session: SessionAccess,
    result: Mutex<Option<CallToolResult>>,
    raw_response: Mutex<Option<Bytes>>,
}

impl HttpCallContext {
    pub fn new(headers: HeaderMap, body: Bytes, session: SessionAccess) -> Self {
        let arguments = match serde_json::from_slice::<Value>(&body) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        };
        Self {
            headers,
            body,
            arguments,
            session,
            result: Mutex::new(None),
            raw_response: Mutex::new(None),
        }
    }
}

impl CallContext for HttpCallContext {
    fn arguments(&self) -> &Map<String, Value> {
        &self.arguments
    }

    fn session(&self) -> &SessionAccess {
        &self.session
    }

    fn respond(&self, result: CallToolResult) {
        *self.result.lock() = Some(result);
    }

    fn request_headers(&self) -> Result<&HeaderMap, ContextError> {
        Ok(&self.headers)
    }

    fn request_body(&self) -> Result<&Bytes, ContextError> {
        Ok(&self.body)
    }

    fn write_raw_response(&self, body: Bytes) -> Result<(), ContextError> {
        *self.raw_response.lock() = Some(body);
        Ok(())
    }
}

impl IntoResponse for HttpCallContext {
    fn into_response(self) -> Response {
        if let Some(body) = self.raw_response.into_inner() {
            return body.into_response();
        }
        match self.result.into_inner() {
            Some(result) => Json(result).into_response(),
            None => axum::http::StatusCode::NO_CONTENT.into_response(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    fn ctx(args: Value) -> ToolCallContext {
        let Value::Object(map) = args else {
            panic!("arguments must be an object");
        };
        ToolCallContext::new("test", map, SessionAccess::detached())
    }

    #[test]
    fn test_typed_getters() {
        let ctx = ctx(json!({
            "name": "flow",
            "count": 3,
            "big": 5_000_000_000i64,
            "ratio": 0.5,
            "enabled": true,
            "tags": ["a", "b"],
            "mixed": ["a", 1],
            "opts": {"x": 1}
        }));

        assert_eq!(ctx.get_string("name"), Some("flow"));
        assert_eq!(ctx.get_int("count"), Some(3));
        assert_eq!(ctx.get_int("big"), None);
        assert_eq!(ctx.get_long("big"), Some(5_000_000_000));
        assert_eq!(ctx.get_double("ratio"), Some(0.5));
        assert_eq!(ctx.get_double("count"), Some(3.0));
        assert_eq!(ctx.get_bool("enabled"), Some(true));
        assert_eq!(
            ctx.get_string_list("tags"),
            Some(vec!["a".to_string(), "b".to_string()])
        );
        assert_eq!(ctx.get_string_list("mixed"), None);
        assert_eq!(ctx.get_object("opts").unwrap().get("x"), Some(&json!(1)));

        // Type mismatches read as absent
        assert_eq!(ctx.get_string("count"), None);
        assert_eq!(ctx.get_bool("name"), None);
    }

    #[test]
    fn test_required_getters_name_the_key() {
        let ctx = ctx(json!({"count": "three", "nothing": null}));

        assert_eq!(
            ctx.require_int("count"),
            Err(ArgumentError::TypeMismatch {
                key: "count".to_string(),
                expected: "int"
            })
        );
        assert_eq!(
            ctx.require_string("flow_id"),
            Err(ArgumentError::Missing {
                key: "flow_id".to_string()
            })
        );
        assert_eq!(
            ctx.require_bool("nothing"),
            Err(ArgumentError::Missing {
                key: "nothing".to_string()
            })
        );
        assert_eq!(
            ctx.require_int("count").unwrap_err().to_string(),
            "argument 'count' must be of type int"
        );
    }

    #[test]
    fn test_typed_argument_struct() {
        #[derive(Deserialize)]
        struct Params {
            name: String,
            #[serde(default)]
            loud: bool,
        }

        let ctx = ctx(json!({"name": "x"}));
        let params: Params = ctx.argument().unwrap();
        assert_eq!(params.name, "x");
        assert!(!params.loud);

        let bad = self::ctx(json!({"loud": true}));
        assert!(matches!(
            bad.argument::<Params>(),
            Err(ArgumentError::Invalid(_))
        ));
    }

    #[test]
    fn test_last_response_wins() {
        let ctx = ctx(json!({}));
        assert!(ctx.take_result().is_none());

        ctx.respond_text("first");
        ctx.clone().respond_error("second");

        let result = ctx.take_result().unwrap();
        assert!(result.is_error);
        assert_eq!(result.text_content(), "second");
    }

    #[test]
    fn test_raw_request_access_fails_in_tool_call() {
        let ctx = ctx(json!({}));
        assert_eq!(
            ctx.request_body().unwrap_err(),
            ContextError::Unsupported {
                operation: "request body access"
            }
        );
        assert!(ctx.request_headers().is_err());
        assert_eq!(
            ctx.write_raw_response(Bytes::from_static(b"raw")),
            Err(ContextError::Unsupported {
                operation: "raw response writing"
            })
        );
    }

    #[tokio::test]
    async fn test_http_context_raw_response_wins() {
        use http_body_util::BodyExt;

        let ctx = HttpCallContext::new(HeaderMap::new(), Bytes::new(), SessionAccess::detached());
        ctx.respond_text("ignored");
        ctx.write_raw_response(Bytes::from_static(b"raw body")).unwrap();

        let body = ctx.into_response().into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"raw body");
    }

    #[tokio::test]
    async fn test_http_context_without_result_is_no_content() {
        let ctx = HttpCallContext::new(HeaderMap::new(), Bytes::new(), SessionAccess::detached());
        assert_eq!(
            ctx.into_response().status(),
            axum::http::StatusCode::NO_CONTENT
        );
    }

    #[test]
    fn test_http_context_reads_json_body() {
        let ctx = HttpCallContext::new(
            HeaderMap::new(),
            Bytes::from_static(br#"{"name":"x"}"#),
            SessionAccess::detached(),
        );
        assert_eq!(ctx.get_string("name"), Some("x"));
        assert_eq!(ctx.request_body().unwrap().len(), 12);

        let empty = HttpCallContext::new(
            HeaderMap::new(),
            Bytes::from_static(b"not json"),
            SessionAccess::detached(),
        );
        assert!(empty.arguments().is_empty());
    }
}
