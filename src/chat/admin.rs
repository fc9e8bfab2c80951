// Administrative HTTP API
//
//   DELETE /clear-messages   remove every stored message
//   GET    /status           message and connection counts

use crate::chat::hub::ChatHub;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Method, Request, Response, Server, StatusCode};
use serde_json::json;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Bind the admin API and serve it until `shutdown` fires
///
/// Returns the bound address so callers can ask for port 0.
pub fn spawn_admin_server(
    addr: SocketAddr,
    hub: Arc<ChatHub>,
    shutdown: CancellationToken,
) -> Result<(SocketAddr, JoinHandle<()>), hyper::Error> {
    let make_svc = make_service_fn(move |_conn| {
        let hub = hub.clone();
        async move {
            Ok::<_, Infallible>(service_fn(move |req| {
                let hub = hub.clone();
                async move { Ok::<_, Infallible>(handle_request(req, &hub).await) }
            }))
        }
    });

    let server = Server::try_bind(&addr)?.serve(make_svc);
    let bound = server.local_addr();

    let task = tokio::spawn(async move {
        let graceful = server.with_graceful_shutdown(async move { shutdown.cancelled().await });
        if let Err(e) = graceful.await {
            tracing::error!("Admin API error: {}", e);
        }
        tracing::info!("Admin API stopped");
    });

    Ok((bound, task))
}

/// Route one admin request
pub async fn handle_request(req: Request<Body>, hub: &ChatHub) -> Response<Body> {
    match (req.method(), req.uri().path()) {
        (&Method::DELETE, "/clear-messages") => match hub.clear_all() {
            Ok(removed) => json_response(
                StatusCode::OK,
                json!({ "success": true, "removed": removed }),
            ),
            Err(e) => {
                tracing::error!("Failed to clear messages: {}", e);
                json_response(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({ "success": false, "error": e.to_string() }),
                )
            }
        },
        (&Method::GET, "/status") => match hub.store().count() {
            Ok(messages) => json_response(
                StatusCode::OK,
                json!({
                    "messages": messages,
                    "connections": hub.registry().len().await,
                    "horizonSecs": hub.settings().horizon.as_secs(),
                }),
            ),
            Err(e) => json_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({ "success": false, "error": e.to_string() }),
            ),
        },
        _ => json_response(
            StatusCode::NOT_FOUND,
            json!({ "success": false, "error": "not found" }),
        ),
    }
}

fn json_response(status: StatusCode, body: serde_json::Value) -> Response<Body> {
    let mut response = Response::new(Body::from(body.to_string()));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::clock::SystemClock;
    use crate::chat::hub::HubSettings;
    use crate::chat::store::{FailingStore, MemoryStore, MessageStore};
    use std::sync::atomic::Ordering;

    async fn call(hub: &ChatHub, method: Method, path: &str) -> (StatusCode, serde_json::Value) {
        let req = Request::builder()
            .method(method)
            .uri(path)
            .body(Body::empty())
            .unwrap();
        let response = handle_request(req, hub).await;
        let status = response.status();
        let bytes = hyper::body::to_bytes(response.into_body()).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    fn memory_hub() -> ChatHub {
        let store: Arc<dyn MessageStore> = Arc::new(MemoryStore::new(Arc::new(SystemClock)));
        ChatHub::new(store, Arc::new(SystemClock), HubSettings::default())
    }

    #[tokio::test]
    async fn test_clear_messages() {
        let hub = memory_hub();
        hub.store().append("alice", "one").unwrap();
        hub.store().append("bob", "two").unwrap();

        let (status, body) = call(&hub, Method::DELETE, "/clear-messages").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["removed"], 2);
        assert_eq!(hub.store().count().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_status_and_not_found() {
        let hub = memory_hub();
        hub.store().append("alice", "one").unwrap();

        let (status, body) = call(&hub, Method::GET, "/status").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["messages"], 1);
        assert_eq!(body["connections"], 0);
        assert_eq!(body["horizonSecs"], 3600);

        let (status, body) = call(&hub, Method::GET, "/clear-messages").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["success"], false);
    }

    #[tokio::test]
    async fn test_clear_failure_is_reported() {
        let store = Arc::new(FailingStore::new(Arc::new(SystemClock)));
        store.fail_clear.store(true, Ordering::SeqCst);
        let hub = ChatHub::new(store, Arc::new(SystemClock), HubSettings::default());

        let (status, body) = call(&hub, Method::DELETE, "/clear-messages").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["success"], false);
        assert!(body["error"].as_str().unwrap().contains("poisoned"));
    }
}
