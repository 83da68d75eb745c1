//! Fixtures shared by the integration tests.
#![allow(dead_code)]

use std::collections::BTreeMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use axum::{
    Form, Json, Router,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{
        IntoResponse, Response,
        sse::{Event, Sse},
    },
    routing::post,
};
use futures::StreamExt;
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use url::Url;

use omni_mcp::core::mcp::{AuthManager, ServerDescriptor, TokenStore};

/// Session id handed out by [`spawn_http_server`].
pub const SESSION_ID: &str = "session-42";

/// Line-oriented MCP server for `/bin/sh`. Answers as `$MCP_NAME` and offers
/// one tool, `calc`.
const SH_SERVER: &str = r#"
while IFS= read -r line; do
  id=$(printf '%s\n' "$line" | sed -n 's/.*"id":\([0-9][0-9]*\).*/\1/p')
  case "$line" in
    *'"method":"initialize"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"protocolVersion":"2025-06-18","capabilities":{"tools":{}},"serverInfo":{"name":"%s"}}}\n' "$id" "$MCP_NAME" ;;
    *'"method":"tools/list"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"tools":[{"name":"calc","description":"Evaluate","inputSchema":{"type":"object"}}]}}\n' "$id" ;;
    *'"method":"tools/call"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"content":[{"type":"text","text":"%s"}]}}\n' "$id" "$MCP_NAME" ;;
    *'"method":"ping"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{}}\n' "$id" ;;
  esac
done
"#;

/// Local-process descriptor running [`SH_SERVER`].
pub fn sh_server(name: &str, priority: i64) -> ServerDescriptor {
    ServerDescriptor::local_process(name, "/bin/sh", ["-c", SH_SERVER])
        .with_env(BTreeMap::from([("MCP_NAME".to_string(), name.to_string())]))
        .with_priority(priority)
}

/// Local-process descriptor whose command cannot be spawned.
pub fn broken_server(name: &str) -> ServerDescriptor {
    ServerDescriptor::local_process(name, "/nonexistent/mcp-server", Vec::<String>::new())
        .with_retry(omni_mcp::core::mcp::RetryPolicy::none())
}

pub fn auth_manager(dir: &Path) -> AuthManager {
    AuthManager::new(TokenStore::with_root(dir.to_path_buf()))
}

/// Answer one JSON-RPC request the way a small MCP server would.
///
/// Notifications get no answer.
pub fn respond(request: &Value) -> Option<Value> {
    let id = request.get("id")?.clone();
    let method = request["method"].as_str().unwrap_or_default();
    let params = &request["params"];

    let result = match method {
        "initialize" => json!({
            "protocolVersion": "2025-06-18",
            "capabilities": {"tools": {}, "resources": {}, "prompts": {}},
            "serverInfo": {"name": "fixture", "version": "1.0.0"}
        }),
        "ping" => json!({}),
        "tools/list" => json!({
            "tools": [{
                "name": "echo",
                "description": "Echo the message back",
                "inputSchema": {"type": "object", "properties": {"message": {"type": "string"}}}
            }]
        }),
        "tools/call" => json!({
            "content": [{"type": "text", "text": params["arguments"]["message"]}]
        }),
        "resources/list" => json!({
            "resources": [{"uri": "mem://greeting", "name": "greeting", "mimeType": "text/plain"}]
        }),
        "resources/templates/list" => json!({"resourceTemplates": []}),
        "resources/read" if params["uri"] == "mem://greeting" => json!({
            "contents": [{"uri": "mem://greeting", "mimeType": "text/plain", "text": "hello"}]
        }),
        "resources/read" => {
            return Some(json!({
                "jsonrpc": "2.0",
                "id": id,
                "error": {"code": -32002, "message": "Resource not found"}
            }));
        }
        "prompts/list" => json!({
            "prompts": [{"name": "review", "arguments": [{"name": "code", "required": true}]}]
        }),
        "prompts/get" => json!({
            "messages": [{
                "role": "user",
                "content": {"type": "text", "text": format!("Review: {}", params["arguments"]["code"].as_str().unwrap_or_default())}
            }]
        }),
        other => {
            return Some(json!({
                "jsonrpc": "2.0",
                "id": id,
                "error": {"code": -32601, "message": format!("Method not found: {other}")}
            }));
        }
    };

    Some(json!({"jsonrpc": "2.0", "id": id, "result": result}))
}

async fn serve(app: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

/// What the HTTP fixture observed
#[derive(Default)]
pub struct HttpLog {
    pub posts: AtomicUsize,
    pub deletes: AtomicUsize,
    pub authorization: Mutex<Vec<String>>,
}

/// Streamable HTTP MCP server at `/mcp`.
///
/// Assigns [`SESSION_ID`] on initialize and rejects later requests that do
/// not echo it.
pub async fn spawn_http_server() -> (Url, Arc<HttpLog>) {
    async fn post_message(
        State(log): State<Arc<HttpLog>>,
        headers: HeaderMap,
        Json(message): Json<Value>,
    ) -> Response {
        log.posts.fetch_add(1, Ordering::SeqCst);
        if let Some(value) = headers.get("authorization").and_then(|v| v.to_str().ok()) {
            log.authorization.lock().push(value.to_string());
        }

        let is_initialize = message["method"] == "initialize";
        let session = headers.get("mcp-session-id").and_then(|v| v.to_str().ok());
        if !is_initialize && session != Some(SESSION_ID) {
            return (StatusCode::BAD_REQUEST, "missing session id").into_response();
        }

        match respond(&message) {
            Some(reply) if is_initialize => {
                ([("mcp-session-id", SESSION_ID)], Json(reply)).into_response()
            }
            Some(reply) => Json(reply).into_response(),
            None => StatusCode::ACCEPTED.into_response(),
        }
    }

    async fn delete_session(State(log): State<Arc<HttpLog>>) -> StatusCode {
        log.deletes.fetch_add(1, Ordering::SeqCst);
        StatusCode::OK
    }

    let log = Arc::new(HttpLog::default());
    let app = Router::new()
        .route("/mcp", post(post_message).delete(delete_session))
        .with_state(Arc::clone(&log));
    let addr = serve(app).await;
    (Url::parse(&format!("http://{addr}/mcp")).unwrap(), log)
}

/// Streamable HTTP MCP server at `/mcp` that answers every request with a
/// `text/event-stream` body.
///
/// Each stream opens with a comment and a `ping` event. `tools/list` is
/// answered in a batch frame behind a progress notification, and `ping`
/// requests get a stream that ends without any answer.
pub async fn spawn_streaming_http_server() -> Url {
    async fn post_message(Json(message): Json<Value>) -> Response {
        let Some(reply) = respond(&message) else {
            return StatusCode::ACCEPTED.into_response();
        };

        let mut events = vec![
            Event::default().comment("stream open"),
            Event::default().event("ping").data("{}"),
        ];
        match message["method"].as_str() {
            Some("ping") => {}
            Some("tools/list") => {
                let progress = json!({
                    "jsonrpc": "2.0",
                    "method": "notifications/progress",
                    "params": {"progressToken": 1, "progress": 1}
                });
                events.push(
                    Event::default()
                        .event("message")
                        .data(json!([progress, reply]).to_string()),
                );
            }
            // unnamed events default to `message`
            _ => events.push(Event::default().data(reply.to_string())),
        }

        Sse::new(futures::stream::iter(
            events.into_iter().map(Ok::<_, Infallible>),
        ))
        .into_response()
    }

    let app = Router::new().route("/mcp", post(post_message));
    let addr = serve(app).await;
    Url::parse(&format!("http://{addr}/mcp")).unwrap()
}

type Outbox = Arc<Mutex<Option<mpsc::UnboundedSender<Value>>>>;

/// Legacy SSE MCP server: events at `/sse`, messages posted to `/messages`.
pub async fn spawn_sse_server() -> Url {
    async fn open_stream(
        State(outbox): State<Outbox>,
    ) -> Sse<impl futures::Stream<Item = Result<Event, Infallible>>> {
        let (tx, rx) = mpsc::unbounded_channel::<Value>();
        *outbox.lock() = Some(tx);

        let endpoint = futures::stream::once(async {
            Ok::<_, Infallible>(Event::default().event("endpoint").data("/messages?session=1"))
        });
        let messages = futures::stream::unfold(rx, |mut rx| async move {
            let message = rx.recv().await?;
            Some((
                Ok::<_, Infallible>(Event::default().event("message").data(message.to_string())),
                rx,
            ))
        });
        Sse::new(endpoint.chain(messages))
    }

    async fn post_message(State(outbox): State<Outbox>, Json(message): Json<Value>) -> StatusCode {
        if let Some(reply) = respond(&message) {
            if let Some(tx) = outbox.lock().as_ref() {
                let _ = tx.send(reply);
            }
        }
        StatusCode::ACCEPTED
    }

    let outbox: Outbox = Arc::new(Mutex::new(None));
    let app = Router::new()
        .route("/sse", axum::routing::get(open_stream))
        .route("/messages", post(post_message))
        .with_state(outbox);
    let addr = serve(app).await;
    Url::parse(&format!("http://{addr}/sse")).unwrap()
}

/// Authorization code the token fixture accepts.
pub const GOOD_CODE: &str = "good-code";

/// Refresh token the token fixture rejects with `invalid_grant`.
pub const REVOKED_REFRESH: &str = "revoked";

/// OAuth token endpoint that counts refresh grants.
///
/// The authorization-code grant needs [`GOOD_CODE`] and a PKCE verifier and
/// answers with access token `exchanged`.
pub async fn spawn_token_server() -> (Url, Arc<AtomicUsize>) {
    fn invalid_grant(description: &str) -> Response {
        (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "invalid_grant", "error_description": description})),
        )
            .into_response()
    }

    async fn token(
        State(refreshes): State<Arc<AtomicUsize>>,
        Form(form): Form<BTreeMap<String, String>>,
    ) -> Response {
        match form.get("grant_type").map(String::as_str) {
            Some("authorization_code") => {
                if form.get("code").map(String::as_str) != Some(GOOD_CODE) {
                    return invalid_grant("unknown code");
                }
                if form.get("code_verifier").is_none_or(String::is_empty) {
                    return invalid_grant("missing code_verifier");
                }
                Json(json!({
                    "access_token": "exchanged",
                    "token_type": "Bearer",
                    "expires_in": 3600,
                    "refresh_token": "refresh-exchanged"
                }))
                .into_response()
            }
            Some("refresh_token") => {
                if form.get("refresh_token").map(String::as_str) == Some(REVOKED_REFRESH) {
                    return invalid_grant("refresh token revoked");
                }
                let count = refreshes.fetch_add(1, Ordering::SeqCst) + 1;
                // slow enough that concurrent callers overlap
                tokio::time::sleep(std::time::Duration::from_millis(50)).await;
                Json(json!({
                    "access_token": format!("fresh-{count}"),
                    "token_type": "Bearer",
                    "expires_in": 3600
                }))
                .into_response()
            }
            _ => (
                StatusCode::BAD_REQUEST,
                Json(json!({"error": "unsupported_grant_type"})),
            )
                .into_response(),
        }
    }

    let refreshes = Arc::new(AtomicUsize::new(0));
    let app = Router::new()
        .route("/token", post(token))
        .with_state(Arc::clone(&refreshes));
    let addr = serve(app).await;
    (Url::parse(&format!("http://{addr}/token")).unwrap(), refreshes)
}
