//! Typed request dispatch pipeline.
//!
//! # Responsibility
//! - Extract raw input from the supported wire channels.
//! - Validate input and output against the declared schema types.
//! - Map every failure mode to exactly one status code.
//!
//! # Invariants
//! - Path-segment and query-string input channels are mutually exclusive;
//!   supplying both fails before the handler runs.
//! - Each dispatch either fully succeeds or produces a single error reply;
//!   no partial responses are emitted.

use crate::meta::MetaError;
use crate::project::{ProjectSlot, ResolveError};
use crate::serialize::SerializeError;
use crate::storage::StorageError;
use indexmap::IndexMap;
use log::warn;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Transport verb of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verb {
    Get,
    Post,
    Put,
    Patch,
    Delete,
    Head,
    Options,
}

impl Display for Verb {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
            Self::Head => "HEAD",
            Self::Options => "OPTIONS",
        };
        write!(f, "{name}")
    }
}

/// Transport-agnostic view of one incoming request.
///
/// The host router is out of scope; it hands over the verb, the raw path
/// capture of the route (when the route declares one), the raw query string
/// and the decoded JSON body.
#[derive(Debug, Clone)]
pub struct RawRequest {
    pub verb: Verb,
    /// Raw trailing path capture, present only for routes with path input.
    pub path: Option<String>,
    pub query: Option<String>,
    pub body: Option<Value>,
}

impl RawRequest {
    pub fn new(verb: Verb) -> Self {
        Self {
            verb,
            path: None,
            query: None,
            body: None,
        }
    }

    pub fn get() -> Self {
        Self::new(Verb::Get)
    }

    pub fn post(body: Value) -> Self {
        let mut req = Self::new(Verb::Post);
        req.body = Some(body);
        req
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query = Some(query.into());
        self
    }
}

/// The single externally visible outcome of a dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub status: u16,
    pub body: String,
}

/// Boundary error taxonomy, mapped to status codes in one place.
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchError {
    /// Malformed or missing input, or both input channels supplied at once.
    BadRequest { reason: String, payload: Value },
    /// The identifier does not resolve, or the tier does not exist.
    NotFound(String),
    /// The handler broke its own output promise, or schema building failed.
    ServerError(String),
    /// The operation does not support the request verb.
    MethodNotAllowed,
}

impl DispatchError {
    pub fn status(&self) -> u16 {
        match self {
            Self::BadRequest { .. } => 400,
            Self::NotFound(_) => 404,
            Self::ServerError(_) => 500,
            Self::MethodNotAllowed => 405,
        }
    }

    fn reply(&self) -> Reply {
        let body = match self {
            Self::BadRequest { reason, payload } => json!({
                "reason": "BadRequest",
                "message": reason,
                "payload": payload,
            }),
            Self::NotFound(message) => json!({
                "reason": "NotFound",
                "message": message,
            }),
            Self::ServerError(message) => json!({
                "reason": "ServerError",
                "message": message,
            }),
            Self::MethodNotAllowed => json!({
                "reason": "MethodNotAllowed",
                "message": "verb not supported by this operation",
            }),
        };
        Reply {
            status: self.status(),
            body: body.to_string(),
        }
    }
}

impl Display for DispatchError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BadRequest { reason, payload } => {
                write!(f, "bad request: {reason} (payload {payload})")
            }
            Self::NotFound(message) => write!(f, "not found: {message}"),
            Self::ServerError(message) => write!(f, "server error: {message}"),
            Self::MethodNotAllowed => write!(f, "method not allowed"),
        }
    }
}

impl Error for DispatchError {}

/// Failures a handler body may produce, still transport-agnostic.
#[derive(Debug)]
pub enum HandlerError {
    /// A referenced value is absent; always surfaces as not-found.
    NotFound(String),
    /// Input-side validation failed inside the handler.
    BadRequest { reason: String, payload: Value },
    /// A promise the server made to itself was broken.
    Defect(String),
}

impl Display for HandlerError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound(message) => write!(f, "not found: {message}"),
            Self::BadRequest { reason, .. } => write!(f, "bad request: {reason}"),
            Self::Defect(message) => write!(f, "defect: {message}"),
        }
    }
}

impl Error for HandlerError {}

impl From<ResolveError> for HandlerError {
    fn from(value: ResolveError) -> Self {
        Self::NotFound(value.to_string())
    }
}

impl From<MetaError> for HandlerError {
    fn from(value: MetaError) -> Self {
        let payload = match &value {
            MetaError::TypeMismatch { raw, .. } => raw.clone(),
            _ => Value::Null,
        };
        Self::BadRequest {
            reason: value.to_string(),
            payload,
        }
    }
}

impl From<StorageError> for HandlerError {
    fn from(value: StorageError) -> Self {
        match value {
            StorageError::AlreadyExists(name) => Self::BadRequest {
                reason: format!("tier already exists: {name}"),
                payload: Value::String(name),
            },
            StorageError::NotFound(name) => Self::NotFound(format!("tier does not exist: {name}")),
            StorageError::Backend(message) => Self::Defect(message),
        }
    }
}

impl From<SerializeError> for HandlerError {
    fn from(value: SerializeError) -> Self {
        match value {
            // A storage race while serializing surfaces as plain not-found.
            SerializeError::Storage(StorageError::NotFound(name)) => {
                Self::NotFound(format!("tier does not exist: {name}"))
            }
            other => Self::Defect(other.to_string()),
        }
    }
}

impl From<HandlerError> for DispatchError {
    fn from(value: HandlerError) -> Self {
        match value {
            HandlerError::NotFound(message) => Self::NotFound(message),
            HandlerError::BadRequest { reason, payload } => Self::BadRequest { reason, payload },
            HandlerError::Defect(message) => Self::ServerError(message),
        }
    }
}

/// Parses a query string in form, no-explode encoding.
///
/// Repeated keys concatenate. A key with a trailing `[]` marks an array
/// value: a single comma-joined string, split on read. Object encodings are
/// not supported.
pub fn parse_query(raw: &str) -> IndexMap<String, Value> {
    let mut joined: IndexMap<String, String> = IndexMap::new();
    for pair in raw.split('&').filter(|pair| !pair.is_empty()) {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        let key = percent_decode(key);
        let value = percent_decode(value);
        joined.entry(key).or_default().push_str(&value);
    }

    let mut query = IndexMap::with_capacity(joined.len());
    for (key, value) in joined {
        if key.ends_with("[]") {
            let items: Vec<Value> = value
                .split(',')
                .map(|item| Value::String(item.to_string()))
                .collect();
            query.insert(key, Value::Array(items));
        } else {
            query.insert(key, Value::String(value));
        }
    }
    query
}

fn percent_decode(raw: &str) -> String {
    let raw = raw.replace('+', " ");
    match urlencoding::decode(&raw) {
        Ok(decoded) => decoded.into_owned(),
        Err(_) => raw,
    }
}

/// Splits a raw path capture into segments, dropping empties and anything
/// after a stray `?` the host router leaves on the tail.
pub fn parse_path_segments(raw: &str) -> Vec<String> {
    let path = raw.split('?').next().unwrap_or(raw);
    path.split('/')
        .filter(|segment| !segment.is_empty())
        .map(str::to_string)
        .collect()
}

fn extract(req: &RawRequest, verb: Verb) -> Result<Value, DispatchError> {
    match verb {
        Verb::Post => req.body.clone().ok_or_else(|| DispatchError::BadRequest {
            reason: "missing request body".to_string(),
            payload: Value::Null,
        }),
        _ => {
            let query = req.query.as_deref().map(parse_query).unwrap_or_default();
            if req.path.is_some() && !query.is_empty() {
                let payload = Value::Object(Map::from_iter(query));
                return Err(DispatchError::BadRequest {
                    reason: "input supplied via both path and query channels".to_string(),
                    payload,
                });
            }
            if let Some(raw_path) = req.path.as_deref() {
                Ok(json!({ "path": parse_path_segments(raw_path) }))
            } else {
                Ok(Value::Object(Map::from_iter(query)))
            }
        }
    }
}

/// Runs one request through the fixed dispatch protocol: extract, validate
/// input, invoke, validate output, serialize.
///
/// `verb` is the single verb the operation supports; any other fails with
/// method-not-allowed before extraction.
pub fn respond<Q, R, F>(slot: &ProjectSlot, verb: Verb, req: &RawRequest, handler: F) -> Reply
where
    Q: DeserializeOwned,
    R: Serialize,
    F: FnOnce(&mut crate::project::Project, Q) -> Result<R, HandlerError>,
{
    if !slot.is_bound() {
        return Reply {
            status: 503,
            body: json!({
                "reason": "ProjectUnbound",
                "message": "current project not set; launch the server from a tierbook project",
            })
            .to_string(),
        };
    }
    match run(slot, verb, req, handler) {
        Ok(body) => Reply { status: 200, body },
        Err(err) => {
            warn!(
                "event=dispatch_reject module=dispatch status={} detail=\"{err}\"",
                err.status()
            );
            err.reply()
        }
    }
}

fn run<Q, R, F>(
    slot: &ProjectSlot,
    verb: Verb,
    req: &RawRequest,
    handler: F,
) -> Result<String, DispatchError>
where
    Q: DeserializeOwned,
    R: Serialize,
    F: FnOnce(&mut crate::project::Project, Q) -> Result<R, HandlerError>,
{
    if req.verb != verb {
        return Err(DispatchError::MethodNotAllowed);
    }

    let raw = extract(req, verb)?;
    let query: Q = serde_json::from_value(raw.clone()).map_err(|err| DispatchError::BadRequest {
        reason: format!("invalid query: {err}"),
        payload: raw,
    })?;

    let outcome = slot
        .with(|project| handler(project, query))
        .ok_or_else(|| DispatchError::ServerError("project torn down mid-request".to_string()))?;
    let response = outcome.map_err(DispatchError::from)?;

    serde_json::to_string(&response)
        .map_err(|err| DispatchError::ServerError(format!("invalid response: {err}")))
}
