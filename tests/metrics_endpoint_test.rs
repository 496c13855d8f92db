//! Integration tests for the JSON metrics endpoint.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use nethub_core::modules::metrics::{
    Labels, MetricDefinition, MetricsConfig, MetricsExporter, MetricsRegistry,
};
use nethub_core::modules::server::{
    CommandService, ConnectionListener, ConnectionRegistry, ConnectionSettings, ListenerConfig,
    ServerMetrics,
};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

async fn start_exporter(registry: Arc<MetricsRegistry>) -> MetricsExporter {
    let config = MetricsConfig {
        port: 0,
        ..MetricsConfig::default()
    };
    let mut exporter = MetricsExporter::new(config, registry);
    exporter.start().await.unwrap();
    exporter
}

async fn fetch(addr: SocketAddr) -> Value {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream
        .write_all(b"GET /metrics HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
        .await
        .unwrap();
    let mut response = String::new();
    stream.read_to_string(&mut response).await.unwrap();

    assert!(response.starts_with("HTTP/1.1 200"), "{response}");
    let (_, body) = response.split_once("\r\n\r\n").unwrap();
    serde_json::from_str(body).unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_increments_exported() {
    let registry = Arc::new(MetricsRegistry::new());
    registry
        .register(MetricDefinition::counter("requests_total", "Total requests"))
        .unwrap();

    let login = Labels::from([("endpoint", "login")]);
    let mut tasks = Vec::new();
    for _ in 0..15 {
        let registry = Arc::clone(&registry);
        let login = login.clone();
        tasks.push(tokio::spawn(async move {
            registry.increment("requests_total", &login, 1.0).unwrap();
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    let mut exporter = start_exporter(registry).await;
    let body = fetch(exporter.local_addr().unwrap()).await;

    assert_eq!(
        body["requests_total"],
        json!({
            "description": "Total requests",
            "type": "counter",
            "values": { r#"{"endpoint": "login"}"#: 15 },
        })
    );

    exporter.stop().await.unwrap();
}

#[tokio::test]
async fn test_endpoint_reports_live_connections() {
    let registry = Arc::new(MetricsRegistry::new());
    let metrics = ServerMetrics::register(Arc::clone(&registry)).unwrap();
    let connections = Arc::new(ConnectionRegistry::new(metrics));

    let mut listener = ConnectionListener::new(
        ListenerConfig::new("tcp", 0),
        ConnectionSettings::default(),
        Arc::clone(&connections),
        Arc::new(CommandService::new("NetHub")),
    );
    let addr = listener.start().await.unwrap();
    let mut exporter = start_exporter(Arc::clone(&registry)).await;
    let metrics_addr = exporter.local_addr().unwrap();

    let body = fetch(metrics_addr).await;
    assert_eq!(
        body["active_connections"]["values"],
        json!({
            r#"{"transport": "plain"}"#: 0,
            r#"{"transport": "tls"}"#: 0,
        })
    );

    let stream = TcpStream::connect(addr).await.unwrap();
    let (read, mut write) = stream.into_split();
    let mut lines = BufReader::new(read).lines();
    lines.next_line().await.unwrap().unwrap();
    write.write_all(b"ping\n").await.unwrap();
    lines.next_line().await.unwrap().unwrap();

    let body = fetch(metrics_addr).await;
    assert_eq!(
        body["active_connections"]["values"][r#"{"transport": "plain"}"#],
        json!(1)
    );
    assert_eq!(
        body["messages_received_total"]["values"][r#"{"transport": "plain"}"#],
        json!(1)
    );

    drop(write);
    drop(lines);
    tokio::time::timeout(Duration::from_secs(5), async {
        while connections.active_count() > 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    let body = fetch(metrics_addr).await;
    assert_eq!(
        body["active_connections"]["values"][r#"{"transport": "plain"}"#],
        json!(0)
    );
    let duration = &body["connection_duration_seconds"]["values"][r#"{"transport": "plain"}"#];
    assert_eq!(duration["count"], json!(1));
    assert_eq!(body["connection_duration_seconds"]["type"], "histogram");

    listener.shutdown(Duration::from_secs(1)).await.unwrap();
    exporter.stop().await.unwrap();
}
