//! The shapeql client.
//!
//! # Example
//!
//! ```ignore
//! use shapeql_sdk::{Client, GraphQLShape, RequestOptions, Variables};
//!
//! #[derive(GraphQLShape)]
//! struct ViewerQuery {
//!     viewer: Viewer,
//! }
//!
//! #[derive(GraphQLShape)]
//! struct Viewer {
//!     login: String,
//!     created_at: String,
//! }
//!
//! let client = Client::new("http://localhost:4000/graphql");
//! let mut query = ViewerQuery::empty();
//! client.query(&mut query, &Variables::new(), RequestOptions::new()).await?;
//! println!("{}", query.viewer.login);
//! ```

use crate::document::{self, Document, OperationType};
use crate::error::{ClientError, ClientResult, ErrorCode};
use crate::reconcile;
use crate::response::{Envelope, ErrorRecord, Errors};
use crate::shape::GraphQLShape;
use crate::transport::{HttpRequest, HyperTransport, Transport, TransportError};
use crate::types::Variables;
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// URL of the GraphQL endpoint.
    pub url: String,
    /// Default timeout for one request.
    pub timeout: Duration,
    /// Default headers.
    pub headers: HashMap<String, String>,
    /// Attach request and response details to returned error records.
    pub debug: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            timeout: Duration::from_secs(30),
            headers: HashMap::new(),
            debug: false,
        }
    }
}

impl ClientConfig {
    /// Creates a new config with a URL.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    /// Sets the timeout.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Adds a default header.
    #[must_use]
    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// Sets the debug flag.
    #[must_use]
    pub fn debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }
}

/// Hook run on every outgoing request, after default headers are applied.
pub type RequestModifier = Arc<dyn Fn(&mut HttpRequest) + Send + Sync>;

/// Destination for the response `extensions` object.
pub trait ExtensionsSink {
    fn bind(&mut self, extensions: &[u8]) -> Result<(), serde_json::Error>;
}

impl<T: DeserializeOwned> ExtensionsSink for T {
    fn bind(&mut self, extensions: &[u8]) -> Result<(), serde_json::Error> {
        *self = serde_json::from_slice(extensions)?;
        Ok(())
    }
}

/// Per-call options.
#[derive(Default)]
pub struct RequestOptions<'a> {
    operation_name: Option<String>,
    debug: Option<bool>,
    timeout: Option<Duration>,
    declare_variables: bool,
    extensions: Option<&'a mut (dyn ExtensionsSink + Send)>,
}

pub type QueryOptions<'a> = RequestOptions<'a>;
pub type ExecOptions<'a> = RequestOptions<'a>;

impl<'a> RequestOptions<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Names the operation. Built documents carry the name in their header;
    /// it is also sent as `operationName`.
    #[must_use]
    pub fn operation_name(mut self, name: impl Into<String>) -> Self {
        self.operation_name = Some(name.into());
        self
    }

    /// Overrides the client's debug flag for this call.
    #[must_use]
    pub fn debug(mut self, debug: bool) -> Self {
        self.debug = Some(debug);
        self
    }

    /// Overrides the client's timeout for this call.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Prepends a variable-declaration header to a shorthand document passed
    /// to the `exec` forms.
    #[must_use]
    pub fn declare_variables(mut self, declare: bool) -> Self {
        self.declare_variables = declare;
        self
    }

    /// Decodes the response `extensions` into `sink` after a successful call.
    /// Left untouched when the response has none.
    #[must_use]
    pub fn bind_extensions<E: ExtensionsSink + Send>(mut self, sink: &'a mut E) -> Self {
        self.extensions = Some(sink);
        self
    }
}

impl fmt::Debug for RequestOptions<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestOptions")
            .field("operation_name", &self.operation_name)
            .field("debug", &self.debug)
            .field("timeout", &self.timeout)
            .field("declare_variables", &self.declare_variables)
            .field("extensions", &self.extensions.is_some())
            .finish()
    }
}

/// The GraphQL client. Cheap to clone.
#[derive(Clone)]
pub struct Client {
    config: Arc<ClientConfig>,
    transport: Arc<dyn Transport>,
    request_modifier: Option<RequestModifier>,
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("config", &self.config)
            .field("request_modifier", &self.request_modifier.is_some())
            .finish_non_exhaustive()
    }
}

impl Client {
    /// Creates a new client with the given URL.
    pub fn new(url: impl Into<String>) -> Self {
        Self::with_config(ClientConfig::new(url))
    }

    /// Creates a new client with configuration, using [`HyperTransport`].
    pub fn with_config(config: ClientConfig) -> Self {
        Self::with_transport(config, HyperTransport::new())
    }

    /// Creates a new client sending through `transport`.
    pub fn with_transport(config: ClientConfig, transport: impl Transport + 'static) -> Self {
        Self {
            config: Arc::new(config),
            transport: Arc::new(transport),
            request_modifier: None,
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Returns a copy of the client with the default debug flag set.
    #[must_use]
    pub fn with_debug(&self, debug: bool) -> Self {
        let mut config = ClientConfig::clone(&self.config);
        config.debug = debug;
        Self {
            config: Arc::new(config),
            ..self.clone()
        }
    }

    /// Returns a copy of the client that runs `modifier` on every request.
    #[must_use]
    pub fn with_request_modifier<F>(&self, modifier: F) -> Self
    where
        F: Fn(&mut HttpRequest) + Send + Sync + 'static,
    {
        Self {
            request_modifier: Some(Arc::new(modifier)),
            ..self.clone()
        }
    }

    /// Runs the query selected by `T` and decodes the result into `target`.
    ///
    /// On a [`ClientError::Graphql`](crate::ClientError::Graphql) error,
    /// `target` holds whatever partial data the server returned.
    pub async fn query<T: GraphQLShape>(
        &self,
        target: &mut T,
        variables: &Variables,
        options: RequestOptions<'_>,
    ) -> ClientResult<()> {
        self.run(OperationType::Query, target, variables, options)
            .await
    }

    /// Like [`Client::query`], as a mutation.
    pub async fn mutate<T: GraphQLShape>(
        &self,
        target: &mut T,
        variables: &Variables,
        options: RequestOptions<'_>,
    ) -> ClientResult<()> {
        self.run(OperationType::Mutation, target, variables, options)
            .await
    }

    /// Runs the query selected by `T` and returns `data` undecoded.
    ///
    /// When the server also returned errors, the call fails with
    /// [`ClientError::Partial`], which still carries `data`.
    pub async fn query_raw<T: GraphQLShape>(
        &self,
        variables: &Variables,
        options: RequestOptions<'_>,
    ) -> ClientResult<Bytes> {
        self.run_raw::<T>(OperationType::Query, variables, options)
            .await
    }

    /// Like [`Client::query_raw`], as a mutation.
    pub async fn mutate_raw<T: GraphQLShape>(
        &self,
        variables: &Variables,
        options: RequestOptions<'_>,
    ) -> ClientResult<Bytes> {
        self.run_raw::<T>(OperationType::Mutation, variables, options)
            .await
    }

    /// Sends a literal document and decodes the result into `target`.
    pub async fn exec<T: GraphQLShape>(
        &self,
        document: &str,
        target: &mut T,
        variables: &Variables,
        options: RequestOptions<'_>,
    ) -> ClientResult<()> {
        let text = literal(document, variables, &options)?;
        let exchange = self.send(&text, variables, &options).await?;
        let decoded = reconcile::reconcile(&exchange.envelope, target);
        exchange.finish(decoded, options)?;
        Ok(())
    }

    /// Sends a literal document and returns `data` undecoded.
    pub async fn exec_raw(
        &self,
        document: &str,
        variables: &Variables,
        options: RequestOptions<'_>,
    ) -> ClientResult<Bytes> {
        let (data, _) = self
            .exec_raw_with_extensions(document, variables, options)
            .await?;
        Ok(data)
    }

    /// Sends a literal document and returns `data` and `extensions`
    /// undecoded.
    pub async fn exec_raw_with_extensions(
        &self,
        document: &str,
        variables: &Variables,
        options: RequestOptions<'_>,
    ) -> ClientResult<(Bytes, Option<Bytes>)> {
        let text = literal(document, variables, &options)?;
        let exchange = self.send(&text, variables, &options).await?;
        exchange.finish_raw(options)
    }

    async fn run<T: GraphQLShape>(
        &self,
        operation: OperationType,
        target: &mut T,
        variables: &Variables,
        options: RequestOptions<'_>,
    ) -> ClientResult<()> {
        let document =
            Document::build::<T>(operation, variables, options.operation_name.as_deref())?;
        let exchange = self.send(&document.text, variables, &options).await?;
        let decoded = reconcile::reconcile(&exchange.envelope, target);
        exchange.finish(decoded, options)?;
        Ok(())
    }

    async fn run_raw<T: GraphQLShape>(
        &self,
        operation: OperationType,
        variables: &Variables,
        options: RequestOptions<'_>,
    ) -> ClientResult<Bytes> {
        let document =
            Document::build::<T>(operation, variables, options.operation_name.as_deref())?;
        let exchange = self.send(&document.text, variables, &options).await?;
        let (data, _) = exchange.finish_raw(options)?;
        Ok(data)
    }

    /// One request/response exchange, up to a parsed envelope.
    async fn send(
        &self,
        query: &str,
        variables: &Variables,
        options: &RequestOptions<'_>,
    ) -> Result<Exchange, Errors> {
        let debug = options.debug.unwrap_or(self.config.debug);
        let timeout = options.timeout.unwrap_or(self.config.timeout);

        let body = encode_body(query, variables, options.operation_name.as_deref())
            .map_err(|err| {
                Errors::single(ErrorRecord::from_cause(
                    ErrorCode::JsonEncodeError,
                    err.to_string(),
                    err,
                ))
            })?;
        let mut trace = Trace {
            debug,
            request_body: body.clone(),
            response: None,
        };

        let mut request = HttpRequest::post(self.config.url.clone(), body);
        for (key, value) in &self.config.headers {
            request.header(key.clone(), value.clone());
        }
        if let Some(modifier) = &self.request_modifier {
            modifier(&mut request);
        }
        let url = request.url.clone();

        debug!(url = %url, bytes = request.body.len(), "sending graphql request");
        let sent = match tokio::time::timeout(timeout, self.transport.send(request)).await {
            Ok(sent) => sent,
            Err(_) => Err(TransportError::Timeout(timeout)),
        };
        let response = match sent {
            Ok(response) => response,
            Err(err) => {
                warn!(url = %url, error = %err, "graphql request failed");
                let message = format!("Post {url:?}: {err}");
                let record = ErrorRecord::from_cause(ErrorCode::RequestError, message, err);
                return Err(trace.fail(Errors::single(record)));
            }
        };

        debug!(
            status = response.status,
            bytes = response.body.len(),
            "received graphql response"
        );
        trace.response = Some((response.status, response.body.clone()));

        if !response.is_success() {
            let record =
                ErrorRecord::new(response.status_text()).with_code(ErrorCode::RequestError);
            return Err(trace.fail(Errors::single(record)));
        }

        match Envelope::parse(&response.body) {
            Ok(envelope) => Ok(Exchange { envelope, trace }),
            Err(err) => {
                let record =
                    ErrorRecord::from_cause(ErrorCode::JsonDecodeError, err.to_string(), err);
                Err(trace.fail(Errors::single(record)))
            }
        }
    }
}

fn literal(
    document: &str,
    variables: &Variables,
    options: &RequestOptions<'_>,
) -> ClientResult<String> {
    if options.declare_variables {
        Ok(document::declare_prebuilt(document, variables)?)
    } else {
        Ok(document.to_string())
    }
}

#[derive(Serialize)]
struct RequestBody<'a> {
    query: &'a str,
    #[serde(skip_serializing_if = "no_variables")]
    variables: &'a Variables,
    #[serde(rename = "operationName", skip_serializing_if = "Option::is_none")]
    operation_name: Option<&'a str>,
}

fn no_variables(variables: &&Variables) -> bool {
    variables.is_empty()
}

/// Compact JSON followed by a newline.
fn encode_body(
    query: &str,
    variables: &Variables,
    operation_name: Option<&str>,
) -> Result<Bytes, serde_json::Error> {
    let mut body = serde_json::to_vec(&RequestBody {
        query,
        variables,
        operation_name,
    })?;
    body.push(b'\n');
    Ok(Bytes::from(body))
}

/// What was sent and received, for debug augmentation.
struct Trace {
    debug: bool,
    request_body: Bytes,
    response: Option<(u16, Bytes)>,
}

impl Trace {
    fn fail(&self, mut errors: Errors) -> Errors {
        if self.debug {
            let internal = self.internal();
            for record in errors.iter_mut() {
                record
                    .extensions
                    .insert("internal".to_string(), internal.clone());
            }
        }
        errors
    }

    fn internal(&self) -> Value {
        let mut internal = serde_json::Map::new();
        internal.insert(
            "request".to_string(),
            json!({
                "method": "POST",
                "body": String::from_utf8_lossy(&self.request_body),
            }),
        );
        if let Some((status, body)) = &self.response {
            internal.insert(
                "response".to_string(),
                json!({
                    "status": status,
                    "body": String::from_utf8_lossy(body),
                }),
            );
        }
        Value::Object(internal)
    }
}

struct Exchange {
    envelope: Envelope,
    trace: Trace,
}

impl Exchange {
    /// Applies debug augmentation to `outcome` and, on success, binds the
    /// response extensions.
    fn finish(
        self,
        outcome: Result<(), Errors>,
        options: RequestOptions<'_>,
    ) -> Result<(Bytes, Option<Bytes>), Errors> {
        outcome.map_err(|errors| self.trace.fail(errors))?;

        let extensions = self.envelope.extensions_bytes();
        if let (Some(sink), Some(raw)) = (options.extensions, &extensions) {
            sink.bind(raw).map_err(|err| {
                let record =
                    ErrorRecord::from_cause(ErrorCode::JsonDecodeError, err.to_string(), err);
                self.trace.fail(Errors::single(record))
            })?;
        }
        Ok((self.envelope.data_bytes(), extensions))
    }

    /// [`Exchange::finish`] for raw calls. Protocol errors that came with
    /// `data` return it undecoded in [`ClientError::Partial`].
    fn finish_raw(self, options: RequestOptions<'_>) -> ClientResult<(Bytes, Option<Bytes>)> {
        let Some(errors) = self.envelope.errors() else {
            return Ok(self.finish(Ok(()), options)?);
        };
        let errors = self.trace.fail(errors);
        if self.envelope.data.is_none() {
            return Err(errors.into());
        }
        Err(ClientError::Partial {
            data: self.envelope.data_bytes(),
            extensions: self.envelope.extensions_bytes(),
            errors,
        })
    }
}
