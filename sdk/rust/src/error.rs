//! Error types for shapeql.
//!
//! Three families exist:
//! - [`BuildError`]: the shape or the variables cannot be turned into a
//!   document. Raised before any network activity.
//! - [`Errors`]: the aggregate of [`ErrorRecord`]s returned by the server, or
//!   synthesized from a transport or decode failure.
//! - [`ClientError`]: what the client facade returns, one of the two above.
//!   Raw calls that received `data` together with errors keep both.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

pub use crate::response::{ErrorRecord, Errors, Location};

/// Codes written to `extensions.code` of records synthesized on the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum ErrorCode {
    /// The transport failed or the server answered with a non-2xx status.
    RequestError,
    /// The request body could not be encoded.
    JsonEncodeError,
    /// The response body, or the bound extensions, could not be decoded.
    JsonDecodeError,
    /// `data` could not be decoded into the target shape.
    GraphqlDecodeError,
}

impl ErrorCode {
    /// Returns the string representation of the error code.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::RequestError => "request_error",
            Self::JsonEncodeError => "json_encode_error",
            Self::JsonDecodeError => "json_decode_error",
            Self::GraphqlDecodeError => "graphql_decode_error",
        }
    }

    /// Returns true for failures that happened before or around the exchange
    /// rather than inside the server's execution.
    pub const fn is_request_error(&self) -> bool {
        matches!(self, Self::RequestError)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A shape or variable set that cannot be turned into a document.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum BuildError {
    #[error("malformed graphql tag {tag:?} on `{type_name}.{field}`: {reason}")]
    MalformedTag {
        type_name: &'static str,
        field: &'static str,
        tag: String,
        reason: &'static str,
    },

    #[error("`{type_name}.{field}` is flattened but does not select an object")]
    FlattenNonObject {
        type_name: &'static str,
        field: &'static str,
    },

    #[error("selection `{name}` appears twice in `{type_name}`")]
    DuplicateSelection { type_name: &'static str, name: String },

    #[error("cannot infer a type for variable `${name}`: {reason}")]
    UnmappableVariable { name: String, reason: &'static str },

    #[error("variable `${0}` is used by the document but was not provided")]
    MissingVariable(String),

    #[error("failed to encode variable `${name}`")]
    EncodeVariable {
        name: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Error returned by the [`Client`](crate::client::Client) call shapes.
#[derive(Error, Debug)]
pub enum ClientError {
    /// The document could not be built; nothing was sent.
    #[error(transparent)]
    Build(#[from] BuildError),

    /// Transport, decode or protocol errors. When the server returned
    /// partial data, it has already been decoded into the target.
    #[error(transparent)]
    Graphql(#[from] Errors),

    /// The server returned errors alongside `data` to a raw call. The raw
    /// `data` and `extensions` are kept here undecoded.
    #[error("{errors}")]
    Partial {
        data: Bytes,
        extensions: Option<Bytes>,
        #[source]
        errors: Errors,
    },
}

impl ClientError {
    /// Returns the error aggregate, if this is not a build error.
    pub fn errors(&self) -> Option<&Errors> {
        match self {
            Self::Graphql(errors) | Self::Partial { errors, .. } => Some(errors),
            Self::Build(_) => None,
        }
    }

    /// Consumes the error and returns the aggregate, if any.
    pub fn into_errors(self) -> Option<Errors> {
        match self {
            Self::Graphql(errors) | Self::Partial { errors, .. } => Some(errors),
            Self::Build(_) => None,
        }
    }

    /// The raw `data` a raw call received together with errors.
    pub fn partial_data(&self) -> Option<&Bytes> {
        match self {
            Self::Partial { data, .. } => Some(data),
            Self::Build(_) | Self::Graphql(_) => None,
        }
    }

    /// Returns true if the aggregate was synthesized from a transport failure.
    pub fn is_request_error(&self) -> bool {
        self.errors().is_some_and(Errors::is_request_error)
    }
}

/// Type alias for client results.
pub type ClientResult<T> = std::result::Result<T, ClientError>;
