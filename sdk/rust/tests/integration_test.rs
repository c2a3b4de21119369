//! Integration tests for shapeql_sdk

use async_trait::async_trait;
use bytes::Bytes;
use serde::Deserialize;
use serde_json::json;
use shapeql_sdk::{
    Client, ClientConfig, ClientError, Field, GraphQLShape, HttpRequest, HttpResponse, Id, RawJson,
    RequestOptions, Transport, TransportError, Variables,
};
use std::error::Error as _;
use std::sync::{Arc, Mutex};
use std::time::Duration;

type Handler = dyn Fn(&HttpRequest) -> Result<HttpResponse, TransportError> + Send + Sync;

/// Answers every request with `handler`, recording what was sent.
struct MockTransport {
    handler: Box<Handler>,
    requests: Arc<Mutex<Vec<HttpRequest>>>,
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let response = (self.handler)(&request);
        self.requests.lock().unwrap().push(request);
        response
    }
}

fn mock_client<F>(handler: F) -> (Client, Arc<Mutex<Vec<HttpRequest>>>)
where
    F: Fn(&HttpRequest) -> Result<HttpResponse, TransportError> + Send + Sync + 'static,
{
    let requests = Arc::new(Mutex::new(Vec::new()));
    let transport = MockTransport {
        handler: Box::new(handler),
        requests: Arc::clone(&requests),
    };
    (
        Client::with_transport(ClientConfig::new("/graphql"), transport),
        requests,
    )
}

fn respond(body: &'static str) -> impl Fn(&HttpRequest) -> Result<HttpResponse, TransportError> {
    move |_| Ok(HttpResponse::new(200, body))
}

fn body_of(request: &HttpRequest) -> &str {
    std::str::from_utf8(&request.body).unwrap()
}

const PARTIAL_DATA: &str = r#"{
    "data": {
        "node1": {
            "id": "MDEyOklzc3VlQ29tbWVudDE2OTQwNzk0Ng=="
        },
        "node2": null
    },
    "errors": [
        {
            "message": "Could not resolve to a node with the global id of 'NotExist'",
            "type": "NOT_FOUND",
            "path": [
                "node2"
            ],
            "locations": [
                {
                    "line": 10,
                    "column": 4
                }
            ]
        }
    ]
}"#;

const NOT_EXIST: &str = "Message: Could not resolve to a node with the global id of 'NotExist', Locations: [{Line:10 Column:4}], Extensions: map[], Path: [node2]";

#[derive(Debug, GraphQLShape)]
struct NodesQuery {
    #[graphql(r#"node1: node(id: "MDEyOklzc3VlQ29tbWVudDE2OTQwNzk0Ng==")"#)]
    node1: Option<Node>,
    #[graphql(r#"node2: node(id: "NotExist")"#)]
    node2: Option<Node>,
}

#[derive(Debug, GraphQLShape)]
struct RawNodesQuery {
    #[graphql("node1")]
    node1: RawJson,
    #[graphql(r#"node2: node(id: "NotExist")"#)]
    node2: Option<Node>,
}

#[derive(Debug, GraphQLShape)]
struct Node {
    id: Id,
}

#[derive(Debug, GraphQLShape)]
struct UserQuery {
    user: User,
}

#[derive(Debug, GraphQLShape)]
struct User {
    name: String,
}

#[derive(Debug, GraphQLShape)]
struct UserIdQuery {
    user: UserWithId,
}

#[derive(Debug, Deserialize, GraphQLShape)]
struct UserWithId {
    #[graphql("id")]
    id: String,
    #[graphql("name")]
    name: String,
    #[graphql("-")]
    #[serde(default)]
    ignored: String,
}

#[derive(Debug, Deserialize)]
struct UserIdData {
    user: UserWithId,
}

#[derive(Debug, Default, Deserialize)]
struct Extensions {
    id: i32,
    domain: String,
}

#[tokio::test]
async fn test_query_partial_data_with_errors() {
    let (client, _) = mock_client(respond(PARTIAL_DATA));
    let mut query = NodesQuery::empty();

    let err = client
        .query_raw::<NodesQuery>(&Variables::new(), RequestOptions::new())
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), NOT_EXIST);
    let data: serde_json::Value = serde_json::from_slice(err.partial_data().unwrap()).unwrap();
    assert_eq!(data["node1"]["id"], "MDEyOklzc3VlQ29tbWVudDE2OTQwNzk0Ng==");
    assert!(data["node2"].is_null());

    let err = client
        .query(&mut query, &Variables::new(), RequestOptions::new())
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), NOT_EXIST);

    let node1 = query.node1.as_ref().expect("node1 should be decoded");
    assert_eq!(node1.id, "MDEyOklzc3VlQ29tbWVudDE2OTQwNzk0Ng==");
    assert!(query.node2.is_none());
}

#[tokio::test]
async fn test_query_partial_raw_field_with_errors() {
    let (client, _) = mock_client(respond(PARTIAL_DATA));
    let mut query = RawNodesQuery::empty();

    let err = client
        .query(&mut query, &Variables::new(), RequestOptions::new())
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), NOT_EXIST);
    assert_eq!(
        query.node1.as_str(),
        r#"{"id":"MDEyOklzc3VlQ29tbWVudDE2OTQwNzk0Ng=="}"#
    );
    assert!(query.node2.is_none());

    let client = client.with_debug(true);
    let err = client
        .query(&mut query, &Variables::new(), RequestOptions::new())
        .await
        .unwrap_err();
    let errors = err.errors().unwrap();
    assert_eq!(
        errors[0].message,
        "Could not resolve to a node with the global id of 'NotExist'"
    );
    assert_eq!(errors[0].path.len(), 1);
    assert_eq!(errors[0].locations.len(), 1);
}

#[tokio::test]
async fn test_query_no_data_with_errors() {
    let (client, _) = mock_client(respond(
        r#"{
            "errors": [
                {
                    "message": "Field 'user' is missing required arguments: login",
                    "locations": [
                        {
                            "line": 7,
                            "column": 3
                        }
                    ]
                }
            ]
        }"#,
    ));
    let mut query = UserQuery::empty();

    let err = client
        .query(&mut query, &Variables::new(), RequestOptions::new())
        .await
        .unwrap_err();
    assert_eq!(
        err.to_string(),
        "Message: Field 'user' is missing required arguments: login, Locations: [{Line:7 Column:3}], Extensions: map[], Path: []"
    );
    assert_eq!(query.user.name, "");
    assert!(!err.is_request_error());

    let err = client
        .query_raw::<UserQuery>(&Variables::new(), RequestOptions::new())
        .await
        .unwrap_err();
    assert!(err.partial_data().is_none());
    assert_eq!(err.errors().map(|errors| errors.len()), Some(1));

    let client = client.with_debug(true);
    let err = client
        .query(&mut query, &Variables::new(), RequestOptions::new())
        .await
        .unwrap_err();
    let errors = err.errors().unwrap();
    assert_eq!(
        errors[0].message,
        "Field 'user' is missing required arguments: login"
    );
    assert_eq!(
        errors[0].extensions["internal"]["request"]["body"],
        "{\"query\":\"{user{name}}\"}\n"
    );
}

#[tokio::test]
async fn test_query_error_status_code() {
    let (client, _) = mock_client(|_| Ok(HttpResponse::new(500, "important message\n")));
    let mut query = UserQuery::empty();

    let err = client
        .query(&mut query, &Variables::new(), RequestOptions::new())
        .await
        .unwrap_err();
    assert_eq!(
        err.to_string(),
        "Message: 500 Internal Server Error, Locations: [], Extensions: map[code:request_error], Path: []"
    );
    assert_eq!(query.user.name, "");
    assert!(err.is_request_error());

    let errors = err.errors().unwrap();
    assert_eq!(errors[0].code(), Some("request_error"));
    assert!(errors[0].extensions.get("internal").is_none());

    let client = client.with_debug(true);
    let err = client
        .query(&mut query, &Variables::new(), RequestOptions::new())
        .await
        .unwrap_err();
    let errors = err.errors().unwrap();
    assert_eq!(errors[0].message, "500 Internal Server Error");
    assert_eq!(errors[0].code(), Some("request_error"));

    let internal = &errors[0].extensions["internal"];
    assert_eq!(internal["request"]["method"], "POST");
    assert_eq!(internal["request"]["body"], "{\"query\":\"{user{name}}\"}\n");
    assert_eq!(internal["response"]["status"], 500);
    assert_eq!(internal["response"]["body"], "important message\n");
}

#[derive(Debug, thiserror::Error)]
#[error("bad error")]
struct BadError;

fn caused_by_bad_error(err: &(dyn std::error::Error + 'static)) -> bool {
    match err.downcast_ref::<TransportError>() {
        Some(TransportError::Other(inner)) => inner.downcast_ref::<BadError>().is_some(),
        _ => false,
    }
}

#[tokio::test]
async fn test_query_request_error() {
    let (client, _) = mock_client(|_| Err(TransportError::other(BadError)));
    let mut query = UserQuery::empty();

    let err = client
        .query(&mut query, &Variables::new(), RequestOptions::new())
        .await
        .unwrap_err();
    assert_eq!(
        err.to_string(),
        r#"Message: Post "/graphql": bad error, Locations: [], Extensions: map[code:request_error], Path: []"#
    );
    assert_eq!(query.user.name, "");
    assert!(err.is_request_error());

    let errors = err.errors().unwrap();
    assert_eq!(errors[0].code(), Some("request_error"));
    assert!(errors[0].extensions.get("internal").is_none());
    assert!(caused_by_bad_error(errors.source().unwrap()));
    assert!(caused_by_bad_error(errors[0].source().unwrap()));

    let client = client.with_debug(true);
    let err = client
        .query(&mut query, &Variables::new(), RequestOptions::new())
        .await
        .unwrap_err();
    let errors = err.errors().unwrap();
    assert_eq!(errors[0].message, r#"Post "/graphql": bad error"#);
    assert_eq!(errors[0].code(), Some("request_error"));

    let internal = &errors[0].extensions["internal"];
    assert_eq!(internal["request"]["body"], "{\"query\":\"{user{name}}\"}\n");
    assert!(internal.get("response").is_none());
}

#[tokio::test]
async fn test_query_empty_variables() {
    let (client, requests) = mock_client(respond(r#"{"data": {"user": {"name": "Gopher"}}}"#));
    let mut query = UserQuery::empty();

    client
        .query(&mut query, &Variables::new(), RequestOptions::new())
        .await
        .unwrap();
    assert_eq!(query.user.name, "Gopher");
    assert_eq!(
        body_of(&requests.lock().unwrap()[0]),
        "{\"query\":\"{user{name}}\"}\n"
    );
}

#[tokio::test]
async fn test_query_ignored_fields() {
    let (client, requests) = mock_client(respond(r#"{"data": {"user": {"name": "Gopher"}}}"#));
    let mut query = UserIdQuery::empty();

    client
        .query(&mut query, &Variables::new(), RequestOptions::new())
        .await
        .unwrap();
    assert_eq!(query.user.name, "Gopher");
    assert_eq!(query.user.ignored, "");
    assert_eq!(
        body_of(&requests.lock().unwrap()[0]),
        "{\"query\":\"{user{id,name}}\"}\n"
    );
}

#[tokio::test]
async fn test_query_raw_response() {
    let (client, requests) = mock_client(respond(r#"{"data": {"user": {"name": "Gopher"}}}"#));

    let raw = client
        .query_raw::<UserIdQuery>(&Variables::new(), RequestOptions::new())
        .await
        .unwrap();
    let mut data: serde_json::Value = serde_json::from_slice(&raw).unwrap();
    data["user"]["id"] = json!("");
    let data: UserIdData = serde_json::from_value(data).unwrap();

    assert_eq!(data.user.name, "Gopher");
    assert_eq!(
        body_of(&requests.lock().unwrap()[0]),
        "{\"query\":\"{user{id,name}}\"}\n"
    );
}

#[tokio::test]
async fn test_exec_query() {
    let (client, requests) = mock_client(respond(r#"{"data": {"user": {"name": "Gopher"}}}"#));
    let mut query = UserIdQuery::empty();

    client
        .exec(
            "{user{id,name}}",
            &mut query,
            &Variables::new(),
            RequestOptions::new(),
        )
        .await
        .unwrap();
    assert_eq!(query.user.name, "Gopher");
    assert_eq!(
        body_of(&requests.lock().unwrap()[0]),
        "{\"query\":\"{user{id,name}}\"}\n"
    );
}

#[tokio::test]
async fn test_exec_query_raw() {
    let (client, requests) = mock_client(respond(r#"{"data": {"user": {"name": "Gopher"}}}"#));

    let raw = client
        .exec_raw("{user{id,name}}", &Variables::new(), RequestOptions::new())
        .await
        .unwrap();
    let data: serde_json::Value = serde_json::from_slice(&raw).unwrap();

    assert_eq!(data["user"]["name"], "Gopher");
    assert_eq!(
        body_of(&requests.lock().unwrap()[0]),
        "{\"query\":\"{user{id,name}}\"}\n"
    );
}

#[tokio::test]
async fn test_exec_raw_with_extensions_keeps_partial_data() {
    let (client, _) = mock_client(respond(
        r#"{
            "data": {"user": {"name": "Gopher"}},
            "errors": [{"message": "deprecated", "path": ["user", "name"]}],
            "extensions": {"id": 1, "domain": "users"}
        }"#,
    ));

    let err = client
        .with_debug(true)
        .exec_raw_with_extensions("{user{name}}", &Variables::new(), RequestOptions::new())
        .await
        .unwrap_err();
    let (data, extensions, errors) = match err {
        ClientError::Partial {
            data,
            extensions,
            errors,
        } => (data, extensions, errors),
        other => panic!("expected partial data, got {other:?}"),
    };
    assert_eq!(&data[..], br#"{"user": {"name": "Gopher"}}"#);
    assert_eq!(&extensions.unwrap()[..], br#"{"id": 1, "domain": "users"}"#);
    assert_eq!(errors.first().message, "deprecated");
    assert!(errors.first().extensions.contains_key("internal"));
}

const WITH_EXTENSIONS: &str =
    r#"{"data": {"user": {"name": "Gopher"}}, "extensions": {"id": 1, "domain": "users"}}"#;

#[tokio::test]
async fn test_bind_extensions() {
    let (client, _) = mock_client(respond(WITH_EXTENSIONS));
    let mut query = UserIdQuery::empty();
    let mut ext = Extensions::default();

    client
        .query(&mut query, &Variables::new(), RequestOptions::new())
        .await
        .unwrap();
    assert_eq!(query.user.name, "Gopher");

    client
        .query(
            &mut query,
            &Variables::new(),
            RequestOptions::new().bind_extensions(&mut ext),
        )
        .await
        .unwrap();
    assert_eq!(query.user.name, "Gopher");
    assert_eq!(ext.id, 1);
    assert_eq!(ext.domain, "users");
}

#[tokio::test]
async fn test_bind_extensions_decode_error() {
    let (client, _) = mock_client(respond(
        r#"{"data": {"user": {"name": "Gopher"}}, "extensions": {"id": "one"}}"#,
    ));
    let mut query = UserQuery::empty();
    let mut ext = Extensions::default();

    let err = client
        .query(
            &mut query,
            &Variables::new(),
            RequestOptions::new().bind_extensions(&mut ext),
        )
        .await
        .unwrap_err();
    assert_eq!(err.errors().unwrap()[0].code(), Some("json_decode_error"));
    assert_eq!(query.user.name, "Gopher");
}

#[tokio::test]
async fn test_exec_raw_with_extensions() {
    let (client, requests) = mock_client(respond(WITH_EXTENSIONS));

    let (data, extensions) = client
        .exec_raw_with_extensions("{user{id,name}}", &Variables::new(), RequestOptions::new())
        .await
        .unwrap();
    let extensions = extensions.expect("extensions should be returned");
    let ext: Extensions = serde_json::from_slice(&extensions).unwrap();

    assert_eq!(ext.id, 1);
    assert_eq!(ext.domain, "users");
    assert!(!data.is_empty());
    assert_eq!(
        body_of(&requests.lock().unwrap()[0]),
        "{\"query\":\"{user{id,name}}\"}\n"
    );
}

#[derive(Debug, GraphQLShape)]
struct LoginQuery {
    #[graphql("user(login: $login)")]
    user: Option<User>,
}

#[derive(Debug, GraphQLShape)]
struct AddStar {
    #[graphql("addStar(input: {starrableId: $id})")]
    add_star: Starred,
}

#[derive(Debug, GraphQLShape)]
struct Starred {
    starrable: Node,
}

#[tokio::test]
async fn test_query_with_variables_and_operation_name() {
    let (client, requests) = mock_client(respond(r#"{"data": {"user": {"name": "Gopher"}}}"#));
    let mut query = LoginQuery::empty();
    let variables = Variables::new().with("login", "gopher").unwrap();

    client
        .query(
            &mut query,
            &variables,
            RequestOptions::new().operation_name("Login"),
        )
        .await
        .unwrap();
    assert_eq!(query.user.unwrap().name, "Gopher");
    assert_eq!(
        body_of(&requests.lock().unwrap()[0]),
        "{\"query\":\"query Login($login: String!){user(login: $login){name}}\",\"variables\":{\"login\":\"gopher\"},\"operationName\":\"Login\"}\n"
    );
}

#[tokio::test]
async fn test_mutate() {
    let (client, requests) = mock_client(respond(
        r#"{"data": {"addStar": {"starrable": {"id": "MDEwOlJlcG9zaXRvcnkzNTk1Nzk0"}}}}"#,
    ));
    let mut mutation = AddStar::empty();
    let variables = Variables::new()
        .with("id", Id::from("MDEwOlJlcG9zaXRvcnkzNTk1Nzk0"))
        .unwrap();

    client
        .mutate(&mut mutation, &variables, RequestOptions::new())
        .await
        .unwrap();
    assert_eq!(mutation.add_star.starrable.id, "MDEwOlJlcG9zaXRvcnkzNTk1Nzk0");
    assert_eq!(
        body_of(&requests.lock().unwrap()[0]),
        "{\"query\":\"mutation($id: ID!){addStar(input: {starrableId: $id}){starrable{id}}}\",\"variables\":{\"id\":\"MDEwOlJlcG9zaXRvcnkzNTk1Nzk0\"}}\n"
    );
}

#[tokio::test]
async fn test_exec_declares_variables() {
    let (client, requests) = mock_client(respond(r#"{"data": {"user": {"name": "Gopher"}}}"#));
    let mut query = LoginQuery::empty();
    let variables = Variables::new().with("login", "gopher").unwrap();

    client
        .exec(
            "{user(login: $login){name}}",
            &mut query,
            &variables,
            RequestOptions::new().declare_variables(true),
        )
        .await
        .unwrap();
    assert_eq!(query.user.unwrap().name, "Gopher");
    assert_eq!(
        body_of(&requests.lock().unwrap()[0]),
        "{\"query\":\"query($login: String!){user(login: $login){name}}\",\"variables\":{\"login\":\"gopher\"}}\n"
    );
}

#[tokio::test]
async fn test_build_error_sends_nothing() {
    let (client, requests) = mock_client(respond(r#"{"data": null}"#));
    let mut query = LoginQuery::empty();
    let variables = Variables::new().with("other", 1).unwrap();

    let err = client
        .query(&mut query, &variables, RequestOptions::new())
        .await
        .unwrap_err();
    assert!(err.errors().is_none());
    assert!(requests.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_invalid_response_body() {
    let (client, _) = mock_client(respond("<html>oops</html>"));
    let mut query = UserQuery::empty();

    let err = client
        .query(&mut query, &Variables::new(), RequestOptions::new())
        .await
        .unwrap_err();
    assert_eq!(err.errors().unwrap()[0].code(), Some("json_decode_error"));
    assert!(!err.is_request_error());
}

#[tokio::test]
async fn test_request_modifier_and_headers() {
    let requests = Arc::new(Mutex::new(Vec::new()));
    let transport = MockTransport {
        handler: Box::new(respond(r#"{"data": {"user": {"name": "Gopher"}}}"#)),
        requests: Arc::clone(&requests),
    };
    let config = ClientConfig::new("/graphql").header("X-Default", "1");
    let client = Client::with_transport(config, transport)
        .with_request_modifier(|request| {
            request.header("Authorization", "Bearer token");
        });
    let mut query = UserQuery::empty();

    client
        .query(&mut query, &Variables::new(), RequestOptions::new())
        .await
        .unwrap();

    let sent = &requests.lock().unwrap()[0];
    assert_eq!(sent.headers["X-Default"], "1");
    assert_eq!(sent.headers["Authorization"], "Bearer token");
    assert_eq!(sent.headers["content-type"], "application/json");
}

struct SlowTransport;

#[async_trait]
impl Transport for SlowTransport {
    async fn send(&self, _request: HttpRequest) -> Result<HttpResponse, TransportError> {
        tokio::time::sleep(Duration::from_secs(10)).await;
        Ok(HttpResponse::new(200, r#"{"data": {"user": {"name": "late"}}}"#))
    }
}

#[tokio::test]
async fn test_timeout_is_request_error() {
    let client = Client::with_transport(ClientConfig::new("/graphql"), SlowTransport);
    let mut query = UserQuery::empty();

    let err = client
        .query(
            &mut query,
            &Variables::new(),
            RequestOptions::new().timeout(Duration::from_millis(20)),
        )
        .await
        .unwrap_err();
    assert!(err.is_request_error());
    assert!(matches!(
        err.errors().unwrap().source().unwrap().downcast_ref::<TransportError>(),
        Some(TransportError::Timeout(_))
    ));
    assert_eq!(query.user.name, "");
}

mod hyper_transport {
    use super::*;
    use http_body_util::Full;
    use hyper::server::conn::http1;
    use hyper::service::service_fn;
    use hyper::body::Incoming;
    use hyper::{Request, Response, StatusCode};
    use hyper_util::rt::TokioIo;
    use std::convert::Infallible;
    use tokio::net::TcpListener;

    async fn serve(status: StatusCode, body: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    return;
                };
                let service = service_fn(move |_request: Request<Incoming>| async move {
                    Ok::<_, Infallible>(
                        Response::builder()
                            .status(status)
                            .header("Content-Type", "application/json")
                            .body(Full::new(Bytes::from_static(body.as_bytes())))
                            .unwrap(),
                    )
                });
                tokio::spawn(async move {
                    let _ = http1::Builder::new()
                        .serve_connection(TokioIo::new(stream), service)
                        .await;
                });
            }
        });

        format!("http://{addr}/graphql")
    }

    #[tokio::test]
    async fn test_query_over_http() {
        let url = serve(StatusCode::OK, r#"{"data": {"user": {"name": "Gopher"}}}"#).await;
        let client = Client::new(url);
        let mut query = UserQuery::empty();

        client
            .query(&mut query, &Variables::new(), RequestOptions::new())
            .await
            .unwrap();
        assert_eq!(query.user.name, "Gopher");
    }

    #[tokio::test]
    async fn test_status_error_over_http() {
        let url = serve(StatusCode::INTERNAL_SERVER_ERROR, "important message\n").await;
        let client = Client::new(url).with_debug(true);
        let mut query = UserQuery::empty();

        let err = client
            .query(&mut query, &Variables::new(), RequestOptions::new())
            .await
            .unwrap_err();
        let errors = err.errors().unwrap();
        assert_eq!(errors[0].message, "500 Internal Server Error");
        assert_eq!(
            errors[0].extensions["internal"]["response"]["body"],
            "important message\n"
        );
    }

    #[tokio::test]
    async fn test_https_is_rejected() {
        let client = Client::new("https://api.github.com/graphql");
        let mut query = UserQuery::empty();

        let err = client
            .query(&mut query, &Variables::new(), RequestOptions::new())
            .await
            .unwrap_err();
        assert!(err.is_request_error());
        assert!(err.to_string().contains("HTTPS is not supported"));
    }
}
