//! Structured errors for the synthesis core.
//!
//! A small closed set of error kinds, each carrying an HTTP status code and
//! a `sanitize_for_client` that drops internal detail (the underlying
//! `source`) before the error is allowed to reach a websocket or HTTP
//! response. Any leaf error (`QueueError`, `CacheError`, ...) can be
//! wrapped into a `TtsError` and carried through `anyhow::Error`.

use std::fmt;

use anyhow::Error as AnyError;

/// Convenience result type for core APIs that bridge into `anyhow`.
pub type TtsResult<T> = std::result::Result<T, AnyError>;

/// Error taxonomy, per spec.md §7.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Client error: bad document id, unknown model, usage denied.
    BadRequest, // 400
    NotAuthenticated, // 401
    Forbidden,        // 403
    /// Unknown document, unknown variant.
    NotFound, // 404
    Conflict,         // 409
    Unprocessable,    // 422
    TooManyRequests,  // 429
    /// Core invariant violation, cache write failure, billing-consumer
    /// failure — all logged, none surfaced with detail to the client.
    GeneralError, // 500
    /// Adapter fatal error (malformed text, unsupported voice).
    BadGateway, // 502
    /// Adapter transient error exhausted its retry budget
    /// (`error_code=adapter_exhausted`).
    Unavailable, // 503
}

impl ErrorKind {
    pub fn status_code(&self) -> u16 {
        match self {
            ErrorKind::BadRequest => 400,
            ErrorKind::NotAuthenticated => 401,
            ErrorKind::Forbidden => 403,
            ErrorKind::NotFound => 404,
            ErrorKind::Conflict => 409,
            ErrorKind::Unprocessable => 422,
            ErrorKind::TooManyRequests => 429,
            ErrorKind::GeneralError => 500,
            ErrorKind::BadGateway => 502,
            ErrorKind::Unavailable => 503,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ErrorKind::BadRequest => "BadRequest",
            ErrorKind::NotAuthenticated => "NotAuthenticated",
            ErrorKind::Forbidden => "Forbidden",
            ErrorKind::NotFound => "NotFound",
            ErrorKind::Conflict => "Conflict",
            ErrorKind::Unprocessable => "Unprocessable",
            ErrorKind::TooManyRequests => "TooManyRequests",
            ErrorKind::GeneralError => "GeneralError",
            ErrorKind::BadGateway => "BadGateway",
            ErrorKind::Unavailable => "Unavailable",
        }
    }

    /// Machine-readable `error_code` for the wire, kebab-cased.
    pub fn code_name(&self) -> &'static str {
        match self {
            ErrorKind::BadRequest => "bad-request",
            ErrorKind::NotAuthenticated => "not-authenticated",
            ErrorKind::Forbidden => "forbidden",
            ErrorKind::NotFound => "not-found",
            ErrorKind::Conflict => "conflict",
            ErrorKind::Unprocessable => "unprocessable",
            ErrorKind::TooManyRequests => "too-many-requests",
            ErrorKind::GeneralError => "general-error",
            ErrorKind::BadGateway => "bad-gateway",
            ErrorKind::Unavailable => "unavailable",
        }
    }
}

/// A structured error that can live inside `anyhow::Error` and cross crate
/// boundaries without losing its kind.
#[derive(Debug)]
pub struct TtsError {
    pub kind: ErrorKind,
    pub message: String,
    pub data: Option<serde_json::Value>,
    pub source: Option<AnyError>,
}

impl TtsError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            data: None,
            source: None,
        }
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn with_source(mut self, source: AnyError) -> Self {
        self.source = Some(source);
        self
    }

    pub fn code(&self) -> u16 {
        self.kind.status_code()
    }

    pub fn into_anyhow(self) -> AnyError {
        AnyError::new(self)
    }

    pub fn from_anyhow(err: &AnyError) -> Option<&TtsError> {
        err.downcast_ref::<TtsError>()
    }

    /// Normalize any error into a `TtsError`: keep it if already one,
    /// otherwise wrap as `GeneralError`.
    pub fn normalize(err: AnyError) -> TtsError {
        match err.downcast::<TtsError>() {
            Ok(tts) => tts,
            Err(other) => {
                TtsError::new(ErrorKind::GeneralError, other.to_string()).with_source(other)
            }
        }
    }

    /// Drop the internal `source` before handing this to a client.
    pub fn sanitize_for_client(&self) -> TtsError {
        TtsError {
            kind: self.kind,
            message: self.message.clone(),
            data: self.data.clone(),
            source: None,
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        let mut base = serde_json::json!({
            "error_code": self.kind.code_name(),
            "error_message": self.message,
        });
        if let Some(d) = &self.data {
            base["data"] = d.clone();
        }
        base
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::BadRequest, msg)
    }
    pub fn not_authenticated(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotAuthenticated, msg)
    }
    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Forbidden, msg)
    }
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, msg)
    }
    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Conflict, msg)
    }
    pub fn unprocessable(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unprocessable, msg)
    }
    pub fn too_many_requests(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::TooManyRequests, msg)
    }
    pub fn general_error(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::GeneralError, msg)
    }
    pub fn bad_gateway(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::BadGateway, msg)
    }
    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unavailable, msg)
    }
}

impl fmt::Display for TtsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}): {}", self.kind.name(), self.code(), self.message)
    }
}

impl std::error::Error for TtsError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

/// Bail with a `TtsError`, the way `dog_core::bail_dog!` did.
#[macro_export]
macro_rules! bail_tts {
    ($ctor:ident, $msg:expr) => {
        return Err($crate::errors::TtsError::$ctor($msg).into_anyhow());
    };
    ($ctor:ident, $fmt:expr, $($arg:tt)*) => {
        return Err($crate::errors::TtsError::$ctor(format!($fmt, $($arg)*)).into_anyhow());
    };
}
