//! HTTP metrics reader against a real local server.

use std::net::SocketAddr;
use std::time::Duration;

use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;
use flexcheck_core::HarnessError;
use flexcheck_metrics::{EntityKind, HttpMetricsReader, MetricsFetcher};

const CLUSTER_METRICS: &str = r#"[
    { "type": "server", "id": "yb.master", "attributes": {}, "metrics": [] },
    {
        "type": "cluster",
        "id": "yb.cluster",
        "attributes": {},
        "metrics": [ { "name": "num_tablet_servers_live", "value": 3 } ]
    }
]"#;

async fn serve(router: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    addr
}

fn reader() -> HttpMetricsReader {
    HttpMetricsReader::new(Duration::from_secs(2)).unwrap()
}

#[tokio::test]
async fn test_fetch_parses_document() {
    let addr = serve(Router::new().route("/metrics", get(|| async { CLUSTER_METRICS }))).await;

    let doc = reader().fetch("127.0.0.1", addr.port()).await.unwrap();

    assert_eq!(doc.entities.len(), 2);
    let live = doc
        .find_counter(EntityKind::Cluster, |_| true, "num_tablet_servers_live")
        .unwrap();
    assert_eq!(live, 3);
}

#[tokio::test]
async fn test_missing_endpoint_is_malformed() {
    let addr = serve(Router::new().route("/other", get(|| async { "[]" }))).await;

    let err = reader().fetch("127.0.0.1", addr.port()).await.unwrap_err();

    assert!(matches!(err, HarnessError::MalformedDocument { .. }), "got {err:?}");
    assert!(!err.is_transient());
}

#[tokio::test]
async fn test_server_error_is_malformed() {
    let addr = serve(Router::new().route(
        "/metrics",
        get(|| async { (StatusCode::SERVICE_UNAVAILABLE, "warming up") }),
    ))
    .await;

    let err = reader().fetch("127.0.0.1", addr.port()).await.unwrap_err();
    assert!(err.to_string().contains("503"), "got {err}");
}

#[tokio::test]
async fn test_garbage_payload_is_malformed() {
    let addr = serve(Router::new().route("/metrics", get(|| async { "<html>oops</html>" }))).await;

    let err = reader().fetch("127.0.0.1", addr.port()).await.unwrap_err();
    assert!(matches!(err, HarnessError::MalformedDocument { .. }), "got {err:?}");
}

#[tokio::test]
async fn test_closed_port_is_unreachable() {
    // Bind then drop to obtain a port nobody listens on
    let port = {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    };

    let err = reader().fetch("127.0.0.1", port).await.unwrap_err();

    assert!(matches!(err, HarnessError::Unreachable { .. }), "got {err:?}");
    assert!(err.is_transient());
}

#[tokio::test]
async fn test_every_fetch_reads_fresh_state() {
    use std::sync::atomic::{AtomicI64, Ordering};
    use std::sync::Arc;

    let live = Arc::new(AtomicI64::new(6));
    let state = Arc::clone(&live);
    let addr = serve(Router::new().route(
        "/metrics",
        get(move || {
            let state = Arc::clone(&state);
            async move {
                format!(
                    r#"[{{"type":"cluster","id":"yb.cluster","metrics":[{{"name":"num_tablet_servers_live","value":{}}}]}}]"#,
                    state.load(Ordering::SeqCst)
                )
            }
        }),
    ))
    .await;

    let reader = reader();
    let read = |doc: flexcheck_metrics::MetricsDocument| {
        doc.find_counter(EntityKind::Cluster, |_| true, "num_tablet_servers_live")
            .unwrap()
    };

    assert_eq!(read(reader.fetch("127.0.0.1", addr.port()).await.unwrap()), 6);
    live.store(3, Ordering::SeqCst);
    assert_eq!(read(reader.fetch("127.0.0.1", addr.port()).await.unwrap()), 3);
}
