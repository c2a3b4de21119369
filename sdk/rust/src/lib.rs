//! shapeql SDK
//!
//! A GraphQL client whose queries are described by Rust structs. The shape of
//! the target struct determines the selection set that is sent, the variable
//! declarations are inferred from the values supplied, and the response is
//! decoded back into the same struct, with partial data kept alongside the
//! server's errors.
//!
//! # Example
//!
//! ```ignore
//! use shapeql_sdk::{Client, Field, GraphQLShape, Id, RequestOptions, Variables};
//!
//! #[derive(GraphQLShape)]
//! struct RepositoryQuery {
//!     #[graphql("repository(owner: $owner, name: $name)")]
//!     repository: Repository,
//! }
//!
//! #[derive(GraphQLShape)]
//! struct Repository {
//!     id: Id,
//!     description: Option<String>,
//! }
//!
//! // query($owner: String!, $name: String!){repository(owner: $owner, name: $name){id,description}}
//! let variables = Variables::new()
//!     .with("owner", "ubugeeei")?
//!     .with("name", "shapeql")?;
//!
//! let client = Client::new("http://localhost:4000/graphql");
//! let mut query = RepositoryQuery::empty();
//! client.query(&mut query, &variables, RequestOptions::new()).await?;
//! ```

extern crate self as shapeql_sdk;

pub mod client;
pub mod document;
pub mod error;
pub mod reconcile;
pub mod response;
pub mod shape;
pub(crate) mod tag;
pub mod transport;
pub mod types;

#[doc(hidden)]
pub mod __private {
    pub use serde_json::Value;
}

// Re-export macros
pub use shapeql_macros::{GraphQLInput, GraphQLShape};

// Re-exports for convenience
pub use client::{
    Client, ClientConfig, ExecOptions, ExtensionsSink, QueryOptions, RequestModifier,
    RequestOptions,
};
pub use document::{Document, OperationType};
pub use error::{BuildError, ClientError, ClientResult, ErrorCode};
pub use response::{Envelope, ErrorRecord, Errors, Location, PathSegment};
pub use shape::{DecodeError, Field, GraphQLShape, Id, Raw, RawJson};
pub use transport::{HttpRequest, HttpResponse, HyperTransport, Transport, TransportError};
pub use types::{InputType, TypeSig, Variables};
