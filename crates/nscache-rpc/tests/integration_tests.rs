//! Integration tests for the nscache-rpc HTTP server.
//!
//! Most tests start the router in-process on an OS-assigned port against an
//! in-memory hub; one test runs the real binary with a configuration file.

use nscache_core::{Gateway, MemoryBackend, RetryConfig};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::AsyncBufReadExt;

struct TestServer {
    port: u16,
    hub: Arc<MemoryBackend>,
    client: reqwest::Client,
}

impl TestServer {
    async fn start() -> Self {
        let hub = Arc::new(MemoryBackend::auto_creating());
        let gateway = Gateway::builder()
            .backend(hub.clone())
            .retry(RetryConfig::once())
            .build()
            .await
            .unwrap();
        let addr = nscache_rpc::start_server(gateway, "127.0.0.1", 0).await.unwrap();
        Self {
            port: addr.port(),
            hub,
            client: reqwest::Client::new(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("http://127.0.0.1:{}{}", self.port, path)
    }

    /// Make an RPC call and return the full JSON-RPC payload.
    async fn rpc_raw(&self, method: &str, params: Value) -> Value {
        self.client
            .post(self.url("/rpc"))
            .json(&json!({
                "jsonrpc": "2.0",
                "method": method,
                "params": params,
                "id": 1
            }))
            .timeout(Duration::from_secs(10))
            .send()
            .await
            .unwrap()
            .json::<Value>()
            .await
            .unwrap()
    }

    /// Make an RPC call, failing the test on a JSON-RPC error.
    async fn rpc(&self, method: &str, params: Value) -> Value {
        let response = self.rpc_raw(method, params).await;
        if let Some(error) = response.get("error") {
            panic!("{} failed: {}", method, error);
        }
        response["result"].clone()
    }

    async fn rpc_error_code(&self, method: &str, params: Value) -> i64 {
        let response = self.rpc_raw(method, params).await;
        response["error"]["code"]
            .as_i64()
            .unwrap_or_else(|| panic!("{} did not fail: {}", method, response))
    }

    /// Register `h1` and the `ns1` bucket over it.
    async fn setup_ns1(&self) -> String {
        self.rpc(
            "create_hub_resource",
            json!({"name": "h1", "endpoint": "http://hub.local", "targetBucket": "hub-data"}),
        )
        .await;
        let created = self
            .rpc(
                "create_bucket",
                json!({"name": "ns1", "hubResource": "h1", "ttlMs": 60000}),
            )
            .await;
        created["bucket_id"].as_str().unwrap().to_string()
    }
}

#[tokio::test]
async fn test_health() {
    let server = TestServer::start().await;
    let body: Value = server
        .client
        .get(server.url("/health"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_create_bucket_and_read_it_back() {
    let server = TestServer::start().await;
    let bucket_id = server.setup_ns1().await;
    assert!(!bucket_id.is_empty());

    let bucket = server.rpc("read_bucket", json!({"name": "ns1"})).await;
    assert_eq!(bucket["ttl_ms"], 60000);
    assert_eq!(bucket["hub_resources"], json!(["h1"]));

    let buckets = server.rpc("list_buckets", json!({})).await;
    assert_eq!(buckets["buckets"].as_array().unwrap().len(), 1);

    let objects = server.rpc("list_objects", json!({"bucket": "ns1"})).await;
    assert_eq!(objects["objects"], json!([]));
}

#[tokio::test]
async fn test_list_objects_shows_cached_keys_only() {
    let server = TestServer::start().await;
    server.setup_ns1().await;
    server.hub.insert("hub-data", "testfile0.txt", "hello");
    server.hub.insert("hub-data", "hub-only.txt", "never read");

    let response = server
        .client
        .get(server.url("/s3/ns1/testfile0.txt"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(response.headers()["x-nscache-status"], "MISS");
    assert!(response.headers().contains_key("etag"));
    assert_eq!(response.text().await.unwrap(), "hello");

    let objects = server.rpc("list_objects", json!({"bucket": "ns1"})).await;
    let keys: Vec<&str> = objects["objects"]
        .as_array()
        .unwrap()
        .iter()
        .map(|o| o["key"].as_str().unwrap())
        .collect();
    assert_eq!(keys, vec!["testfile0.txt"]);

    let listing: Value = server
        .client
        .get(server.url("/s3/ns1"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(listing["key_count"], 1);

    let md = server
        .rpc("read_object_md", json!({"bucket": "ns1", "key": "testfile0.txt"}))
        .await;
    assert_eq!(md["size"], 5);
    assert_eq!(md["fresh"], true);
}

#[tokio::test]
async fn test_second_get_is_a_hit() {
    let server = TestServer::start().await;
    server.setup_ns1().await;
    server.hub.insert("hub-data", "nested/path/file.bin", "abc");

    for expected in ["MISS", "HIT"] {
        let response = server
            .client
            .get(server.url("/s3/ns1/nested/path/file.bin"))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
        assert_eq!(response.headers()["x-nscache-status"], expected);
    }
    assert_eq!(server.hub.fetch_count_for("hub-data", "nested/path/file.bin"), 1);
}

#[tokio::test]
async fn test_head_reports_cached_metadata_only() {
    let server = TestServer::start().await;
    server.setup_ns1().await;
    server.hub.insert("hub-data", "k.txt", "v");

    let response = server
        .client
        .head(server.url("/s3/ns1/k.txt"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);

    server.client.get(server.url("/s3/ns1/k.txt")).send().await.unwrap();
    let response = server
        .client
        .head(server.url("/s3/ns1/k.txt"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(response.headers()["x-nscache-status"], "HIT");
}

#[tokio::test]
async fn test_error_statuses() {
    let server = TestServer::start().await;
    server.setup_ns1().await;

    let missing = server.client.get(server.url("/s3/ns1/missing.txt")).send().await.unwrap();
    assert_eq!(missing.status(), 404);
    let body: Value = missing.json().await.unwrap();
    assert_eq!(body["error"]["code"], -32002);

    let unknown = server.client.get(server.url("/s3/nope/k")).send().await.unwrap();
    assert_eq!(unknown.status(), 404);

    server.hub.set_unavailable(true);
    let down = server.client.get(server.url("/s3/ns1/k")).send().await.unwrap();
    assert_eq!(down.status(), 503);
}

#[tokio::test]
async fn test_put_goes_around_the_cache() {
    let server = TestServer::start().await;
    server.setup_ns1().await;

    let response = server
        .client
        .put(server.url("/s3/ns1/w.txt"))
        .body("one")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert!(response.headers().contains_key("etag"));
    assert_eq!(server.hub.keys("hub-data"), vec!["w.txt".to_string()]);

    let objects = server.rpc("list_objects", json!({"bucket": "ns1"})).await;
    assert_eq!(objects["objects"], json!([]));

    // Cached copy wins over a later direct hub write until TTL.
    server.client.get(server.url("/s3/ns1/w.txt")).send().await.unwrap();
    let response = server
        .client
        .put(server.url("/hub/h1/w.txt"))
        .body("two")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let text = server
        .client
        .get(server.url("/s3/ns1/w.txt"))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert_eq!(text, "one");
}

#[tokio::test]
async fn test_evict_and_clear() {
    let server = TestServer::start().await;
    server.setup_ns1().await;
    server.hub.insert("hub-data", "a", "1");
    server.hub.insert("hub-data", "b", "2");
    server.client.get(server.url("/s3/ns1/a")).send().await.unwrap();
    server.client.get(server.url("/s3/ns1/b")).send().await.unwrap();

    let evicted = server.rpc("evict_object", json!({"bucket": "ns1", "key": "a"})).await;
    assert_eq!(evicted["evicted"], true);

    let cleared = server.rpc("clear_bucket_cache", json!({"bucket": "ns1"})).await;
    assert_eq!(cleared["cleared"], 1);

    let stats = server.rpc("get_stats", json!({})).await;
    assert_eq!(stats["cache"]["total_entries"], 0);
    assert_eq!(stats["reads"]["misses"], 2);
}

#[tokio::test]
async fn test_lifecycle_errors() {
    let server = TestServer::start().await;
    let bucket_id = server.setup_ns1().await;

    assert_eq!(
        server.rpc_error_code("delete_hub_resource", json!({"name": "h1"})).await,
        -32004
    );
    assert_eq!(
        server
            .rpc_error_code(
                "create_bucket",
                json!({"name": "ns2", "hubResource": "h1", "ttlMs": 0})
            )
            .await,
        -32005
    );
    assert_eq!(
        server
            .rpc_error_code(
                "create_bucket",
                json!({"name": "ns2", "hubResource": "zz", "ttlMs": 5})
            )
            .await,
        -32001
    );
    assert_eq!(server.rpc_error_code("no_such_method", json!({})).await, -32601);
    assert_eq!(server.rpc_error_code("read_bucket", json!({})).await, -32602);

    server.rpc("delete_bucket", json!({"bucketId": bucket_id})).await;
    server.rpc("delete_hub_resource", json!({"name": "h1"})).await;
    let resources = server.rpc("list_hub_resources", json!({})).await;
    assert_eq!(resources["resources"], json!([]));
}

#[tokio::test]
async fn test_unhealthy_resource_is_rejected() {
    let server = TestServer::start().await;
    server.hub.set_unavailable(true);
    let code = server
        .rpc_error_code(
            "create_hub_resource",
            json!({"name": "h1", "endpoint": "http://hub.local", "target_bucket": "hub-data"}),
        )
        .await;
    assert_eq!(code, -32003);
}

// =============================================================================
// Binary
// =============================================================================

fn binary_path() -> Option<PathBuf> {
    std::env::var("CARGO_BIN_EXE_nscache-rpc").ok().map(PathBuf::from)
}

#[tokio::test]
async fn test_binary_bootstraps_from_config() {
    let Some(binary) = binary_path() else {
        return;
    };
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("gateway.json");
    std::fs::write(
        &config_path,
        json!({
            "backend": "memory",
            "cache": { "store": "sqlite", "path": temp_dir.path().join("cache.sqlite") },
            "hub_resources": [
                { "name": "h1", "endpoint": "http://hub.local", "target_bucket": "hub-data" }
            ],
            "namespace_buckets": [
                { "name": "ns1", "hub_resources": ["h1"], "ttl_ms": 60000 }
            ]
        })
        .to_string(),
    )
    .unwrap();

    let mut child = tokio::process::Command::new(&binary)
        .arg("--port")
        .arg("0")
        .arg("--config")
        .arg(&config_path)
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .unwrap();

    let stdout = child.stdout.take().unwrap();
    let mut lines = tokio::io::BufReader::new(stdout).lines();
    let mut port = None;
    let deadline = tokio::time::Instant::now() + Duration::from_secs(20);
    while tokio::time::Instant::now() < deadline {
        match tokio::time::timeout(Duration::from_millis(250), lines.next_line()).await {
            Ok(Ok(Some(line))) => {
                if let Some(value) = line.strip_prefix("NSCACHE_PORT=") {
                    port = value.trim().parse::<u16>().ok();
                    break;
                }
            }
            Ok(Ok(None)) | Ok(Err(_)) => break,
            Err(_) => continue,
        }
    }
    let port = port.expect("NSCACHE_PORT line not emitted");

    let client = reqwest::Client::new();
    let put = client
        .put(format!("http://127.0.0.1:{}/s3/ns1/testfile0.txt", port))
        .body("from the binary")
        .send()
        .await
        .unwrap();
    assert_eq!(put.status(), 200);

    let get = client
        .get(format!("http://127.0.0.1:{}/s3/ns1/testfile0.txt", port))
        .send()
        .await
        .unwrap();
    assert_eq!(get.headers()["x-nscache-status"], "MISS");
    assert_eq!(get.text().await.unwrap(), "from the binary");

    let _ = child.kill().await;
}
