//! JSON-RPC 2.0 envelopes, one per line.

use crate::error::DbError;
use serde::Serialize;
use serde_json::Value as JsonValue;

pub const JSONRPC_VERSION: &str = "2.0";

/// A decoded request or notification.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    /// `None` for notifications, which never get a response.
    pub id: Option<JsonValue>,
    pub method: String,
    pub params: JsonValue,
}

impl Request {
    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }
}

/// An envelope that could not be decoded, with the id if one was readable.
#[derive(Debug)]
pub struct EnvelopeError {
    pub id: Option<JsonValue>,
    pub error: DbError,
}

impl EnvelopeError {
    fn new(id: Option<JsonValue>, error: DbError) -> Self {
        Self { id, error }
    }

    pub fn into_response(self) -> Response {
        Response::error(self.id.unwrap_or(JsonValue::Null), self.error)
    }
}

/// Decode one line into a [`Request`].
///
/// Invalid JSON is a parse error; valid JSON that is not a well-formed
/// JSON-RPC 2.0 request object is an invalid request.
pub fn parse_envelope(line: &str) -> Result<Request, EnvelopeError> {
    let value: JsonValue = serde_json::from_str(line)
        .map_err(|e| EnvelopeError::new(None, DbError::parse(e.to_string())))?;

    let JsonValue::Object(mut obj) = value else {
        return Err(EnvelopeError::new(
            None,
            DbError::invalid_request("Envelope must be a JSON object"),
        ));
    };

    let id = obj.remove("id");
    if let Some(ref id) = id {
        if !(id.is_number() || id.is_string() || id.is_null()) {
            return Err(EnvelopeError::new(
                None,
                DbError::invalid_request("Request id must be a number or a string"),
            ));
        }
    }

    if obj.get("jsonrpc").and_then(JsonValue::as_str) != Some(JSONRPC_VERSION) {
        return Err(EnvelopeError::new(
            id,
            DbError::invalid_request("jsonrpc must be \"2.0\""),
        ));
    }

    let method = match obj.remove("method") {
        Some(JsonValue::String(method)) => method,
        _ => {
            return Err(EnvelopeError::new(
                id,
                DbError::invalid_request("method must be a string"),
            ));
        }
    };

    let params = obj.remove("params").unwrap_or(JsonValue::Null);
    if !(params.is_object() || params.is_array() || params.is_null()) {
        return Err(EnvelopeError::new(
            id,
            DbError::invalid_request("params must be an object or an array"),
        ));
    }

    Ok(Request { id, method, params })
}

/// Either side of a response envelope.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseBody {
    Result(JsonValue),
    Error(rmcp::ErrorData),
}

#[derive(Debug, Clone, Serialize)]
pub struct Response {
    pub jsonrpc: &'static str,
    pub id: JsonValue,
    #[serde(flatten)]
    pub body: ResponseBody,
}

impl Response {
    pub fn success(id: JsonValue, result: JsonValue) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id,
            body: ResponseBody::Result(result),
        }
    }

    pub fn error(id: JsonValue, error: DbError) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id,
            body: ResponseBody::Error(error.into()),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self.body, ResponseBody::Error(_))
    }

    /// JSON-RPC error code, if this is an error response.
    pub fn error_code(&self) -> Option<i32> {
        match &self.body {
            ResponseBody::Error(err) => Some(err.code.0),
            ResponseBody::Result(_) => None,
        }
    }

    pub fn result(&self) -> Option<&JsonValue> {
        match &self.body {
            ResponseBody::Result(value) => Some(value),
            ResponseBody::Error(_) => None,
        }
    }

    /// Serialize as a single line (no trailing newline).
    pub fn to_line(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            format!(
                r#"{{"jsonrpc":"2.0","id":null,"error":{{"code":-32603,"message":"Failed to encode response: {}"}}}}"#,
                e.to_string().replace('"', "'")
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::codes;
    use serde_json::json;

    #[test]
    fn test_parse_request() {
        let req = parse_envelope(r#"{"jsonrpc":"2.0","id":7,"method":"tools/list","params":{}}"#)
            .unwrap();
        assert_eq!(req.id, Some(json!(7)));
        assert_eq!(req.method, "tools/list");
        assert!(!req.is_notification());
    }

    #[test]
    fn test_parse_notification() {
        let req =
            parse_envelope(r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#).unwrap();
        assert!(req.is_notification());
        assert_eq!(req.params, JsonValue::Null);
    }

    #[test]
    fn test_parse_errors() {
        let err = parse_envelope("{not json").unwrap_err();
        assert!(matches!(err.error, DbError::Parse { .. }));
        assert!(err.id.is_none());

        let err = parse_envelope(r#"[1,2]"#).unwrap_err();
        assert!(matches!(err.error, DbError::InvalidRequest { .. }));

        let err = parse_envelope(r#"{"jsonrpc":"1.0","id":3,"method":"ping"}"#).unwrap_err();
        assert!(matches!(err.error, DbError::InvalidRequest { .. }));
        assert_eq!(err.id, Some(json!(3)));

        let err = parse_envelope(r#"{"jsonrpc":"2.0","id":4}"#).unwrap_err();
        assert_eq!(err.id, Some(json!(4)));

        let err =
            parse_envelope(r#"{"jsonrpc":"2.0","id":5,"method":"ping","params":3}"#).unwrap_err();
        assert!(matches!(err.error, DbError::InvalidRequest { .. }));
    }

    #[test]
    fn test_response_serialization() {
        let ok = Response::success(json!(1), json!({"tools": []}));
        let value: JsonValue = serde_json::from_str(&ok.to_line()).unwrap();
        assert_eq!(value, json!({"jsonrpc": "2.0", "id": 1, "result": {"tools": []}}));

        let err = Response::error(json!("a"), DbError::method_not_found("nope"));
        assert_eq!(err.error_code(), Some(codes::METHOD_NOT_FOUND));
        let value: JsonValue = serde_json::from_str(&err.to_line()).unwrap();
        assert_eq!(value["id"], json!("a"));
        assert_eq!(value["error"]["code"], json!(codes::METHOD_NOT_FOUND));
        assert!(value.get("result").is_none());
    }

    #[test]
    fn test_envelope_error_without_id_answers_null() {
        let err = parse_envelope("garbage").unwrap_err().into_response();
        assert_eq!(err.id, JsonValue::Null);
        assert_eq!(err.error_code(), Some(codes::PARSE_ERROR));
    }
}
