use std::process::{Command, Stdio};
use std::io::{Write, BufRead, BufReader};
use std::path::Path;
use std::sync::mpsc::{channel, Sender, Receiver};
use std::thread;
use std::time::Duration;
use serde_json::{json, Value};

const CATALOG_EXPORT: &str = r#"{"text": "CPSC 350 Data Structures covers lists, trees, and graphs.", "metadata": {"subject_code": "cs", "catalog_year": "2024"}}
{"text": "The computer science major requires 13 upper-division courses.", "metadata": {"subject_code": "cs", "catalog_year": "2024"}}

not json at all
{"text": "The data science major requires a capstone project.", "metadata": {"subject_code": "ds", "catalog_year": "2024"}}
"#;

/// Run a one-shot CLI command against `index_dir`.
fn run_cli(index_dir: &Path, args: &[&str]) -> std::process::Output {
    Command::new(env!("CARGO_BIN_EXE_advisor-rag"))
        .args(args)
        .env("ADVISOR_RAG_BM25__INDEX_DIR", index_dir)
        .env("ADVISOR_RAG_RERANKER__ENABLED", "false")
        .stderr(Stdio::null())
        .output()
        .expect("Failed to run advisor-rag binary")
}

fn build_catalog_index(index_dir: &Path) {
    let export = index_dir.join("major_catalogs.jsonl");
    std::fs::write(&export, CATALOG_EXPORT).expect("Failed to write export");
    let output = run_cli(
        index_dir,
        &["index", "build", "--collection", "major_catalogs", "--input", export.to_str().unwrap()],
    );
    assert!(output.status.success(), "index build should succeed");
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Indexed 3 chunks"), "unexpected output: {}", stdout);
    assert!(stdout.contains("1 lines skipped"), "unexpected output: {}", stdout);
}

/// Helper struct to manage server process with async I/O
struct McpClient {
    child: std::process::Child,
    tx: Sender<Value>,
    rx: Receiver<Value>,
}

impl McpClient {
    fn spawn(index_dir: &Path) -> Self {
        let mut child = Command::new(env!("CARGO_BIN_EXE_advisor-rag"))
            .env("ADVISOR_RAG_BM25__INDEX_DIR", index_dir)
            .env("ADVISOR_RAG_RERANKER__ENABLED", "false")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())  // Suppress log output in tests
            .spawn()
            .expect("Failed to spawn advisor-rag binary");

        let mut stdin = child.stdin.take().expect("Failed to get stdin");
        let stdout = child.stdout.take().expect("Failed to get stdout");

        // Channel for sending requests
        let (req_tx, req_rx) = channel::<Value>();

        // Channel for receiving responses
        let (resp_tx, resp_rx) = channel::<Value>();

        // Thread to write requests to stdin
        thread::spawn(move || {
            while let Ok(request) = req_rx.recv() {
                let request_str = serde_json::to_string(&request).expect("Failed to serialize");
                if writeln!(stdin, "{}", request_str).is_err() {
                    break;
                }
                if stdin.flush().is_err() {
                    break;
                }
            }
        });

        // Thread to read responses from stdout
        thread::spawn(move || {
            let mut reader = BufReader::new(stdout);
            loop {
                let mut line = String::new();
                match reader.read_line(&mut line) {
                    Ok(0) => break, // EOF
                    Ok(_) => {
                        if let Ok(value) = serde_json::from_str::<Value>(&line) {
                            if resp_tx.send(value).is_err() {
                                break;
                            }
                        }
                    }
                    Err(_) => break,
                }
            }
        });

        McpClient {
            child,
            tx: req_tx,
            rx: resp_rx,
        }
    }

    fn send_request(&self, request: Value) -> Option<Value> {
        self.tx.send(request).ok()?;
        self.rx.recv_timeout(Duration::from_secs(5)).ok()
    }

    fn send_notification(&self, notification: Value) {
        let _ = self.tx.send(notification);
        // Notifications don't have responses, give server time to process
        thread::sleep(Duration::from_millis(50));
    }

    fn initialize(&self) -> Value {
        let response = self
            .send_request(json!({
                "jsonrpc": "2.0",
                "method": "initialize",
                "id": 1,
                "params": {
                    "protocolVersion": "2024-11-05",
                    "capabilities": {},
                    "clientInfo": {"name": "test", "version": "1.0"}
                }
            }))
            .expect("Failed to initialize");
        self.send_notification(json!({
            "jsonrpc": "2.0",
            "method": "notifications/initialized"
        }));
        response
    }

    fn call_tool(&self, id: u64, name: &str, arguments: Value) -> Value {
        self.send_request(json!({
            "jsonrpc": "2.0",
            "method": "tools/call",
            "id": id,
            "params": {"name": name, "arguments": arguments}
        }))
        .unwrap_or_else(|| panic!("Failed to get {} response", name))
    }
}

impl Drop for McpClient {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

#[test]
fn test_initialize_handshake() {
    let dir = tempfile::tempdir().unwrap();
    let client = McpClient::spawn(dir.path());

    let response = client.initialize();

    // Verify response structure
    assert_eq!(response["jsonrpc"], "2.0");
    assert_eq!(response["id"], 1);
    assert!(response["result"].is_object());

    let result = &response["result"];
    assert_eq!(result["protocolVersion"], "2024-11-05");
    assert!(result["capabilities"]["tools"].is_object());
    assert!(result["capabilities"]["resources"].is_object());
    assert_eq!(result["serverInfo"]["name"], "advisor-rag");
    assert!(result["serverInfo"]["version"].is_string());
    assert!(result["serverInfo"]["description"].is_string());
}

#[test]
fn test_tool_discovery() {
    let dir = tempfile::tempdir().unwrap();
    let client = McpClient::spawn(dir.path());
    client.initialize();

    let response = client
        .send_request(json!({
            "jsonrpc": "2.0",
            "method": "tools/list",
            "id": 2
        }))
        .expect("Failed to get tools/list response");

    assert_eq!(response["id"], 2);
    let tools = response["result"]["tools"].as_array().expect("tools should be array");
    assert_eq!(tools.len(), 4, "Should have exactly 4 tools");

    let tool_names: Vec<&str> = tools.iter().filter_map(|t| t["name"].as_str()).collect();
    for expected in ["search_academic", "route_query", "sparse_search", "health_check"] {
        assert!(tool_names.contains(&expected), "missing tool {}", expected);
    }

    // Verify each tool has required fields
    for tool in tools {
        assert!(tool["description"].is_string());
        assert!(tool["inputSchema"].is_object());
    }
}

#[test]
fn test_catalog_resource() {
    let dir = tempfile::tempdir().unwrap();
    build_catalog_index(dir.path());
    let client = McpClient::spawn(dir.path());
    client.initialize();

    let listed = client
        .send_request(json!({"jsonrpc": "2.0", "method": "resources/list", "id": 2}))
        .expect("Failed to list resources");
    let uris: Vec<&str> = listed["result"]["resources"]
        .as_array()
        .expect("resources should be array")
        .iter()
        .filter_map(|r| r["uri"].as_str())
        .collect();
    assert_eq!(uris, vec!["collections://catalog"]);

    let read = client
        .send_request(json!({
            "jsonrpc": "2.0",
            "method": "resources/read",
            "id": 3,
            "params": {"uri": "collections://catalog"}
        }))
        .expect("Failed to read resource");
    let text = read["result"]["contents"][0]["text"].as_str().expect("resource text");
    let catalog: Value = serde_json::from_str(text).expect("catalog should be JSON");
    assert!(catalog.to_string().contains("major_catalogs"));

    let missing = client
        .send_request(json!({
            "jsonrpc": "2.0",
            "method": "resources/read",
            "id": 4,
            "params": {"uri": "collections://nope"}
        }))
        .expect("Failed to get error response");
    assert!(missing["error"].is_object(), "unknown resource should be a protocol error");
}

#[test]
fn test_search_academic_validation_error() {
    let dir = tempfile::tempdir().unwrap();
    let client = McpClient::spawn(dir.path());
    client.initialize();

    let response = client.call_tool(2, "search_academic", json!({"query": "   "}));
    let result = &response["result"];
    assert_eq!(result["isError"], true, "Should have isError: true");

    let content_arr = result["content"].as_array().expect("content should be array");
    let error_text = content_arr[0]["text"].as_str().expect("should have error text");
    assert!(error_text.to_lowercase().contains("query"),
            "Error message should mention 'query': {}", error_text);
}

#[test]
fn test_route_query_keyword() {
    let dir = tempfile::tempdir().unwrap();
    let client = McpClient::spawn(dir.path());
    client.initialize();

    let response = client.call_tool(
        2,
        "route_query",
        json!({"query": "What are the requirements for my major?", "method": "keyword"}),
    );
    let result = &response["result"];
    assert!(result["isError"].is_null() || result["isError"] == false);

    let decision = &result["structuredContent"];
    assert_eq!(decision["method"], "keyword");
    let collections = decision["collections"].as_array().expect("collections array");
    assert!(collections.iter().any(|c| c == "major_catalogs"));
}

#[test]
fn test_sparse_search_over_built_index() {
    let dir = tempfile::tempdir().unwrap();
    build_catalog_index(dir.path());
    let client = McpClient::spawn(dir.path());
    client.initialize();

    let response = client.call_tool(
        2,
        "sparse_search",
        json!({"collection": "major_catalogs", "query": "CPSC 350", "limit": 5}),
    );
    let result = &response["result"];
    assert!(result["isError"].is_null() || result["isError"] == false);

    let content = &result["structuredContent"];
    let results = content["results"].as_array().expect("results array");
    assert!(!results.is_empty());
    assert!(results[0]["text"].as_str().unwrap().contains("CPSC 350"));
    assert!(results[0]["score"].as_f64().unwrap() > 0.0);

    // Unindexed collection is a structured tool error, not a protocol failure
    let response = client.call_tool(
        3,
        "sparse_search",
        json!({"collection": "course_listings", "query": "CPSC 350"}),
    );
    assert_eq!(response["result"]["isError"], true);

    // Out-of-range limit
    let response = client.call_tool(
        4,
        "sparse_search",
        json!({"collection": "major_catalogs", "query": "CPSC 350", "limit": 0}),
    );
    assert_eq!(response["result"]["isError"], true);
}

#[test]
fn test_health_check() {
    let dir = tempfile::tempdir().unwrap();
    build_catalog_index(dir.path());
    let client = McpClient::spawn(dir.path());
    client.initialize();

    let response = client.call_tool(2, "health_check", json!({}));
    let result = &response["result"];
    assert!(result["isError"].is_null() || result["isError"] == false);

    let health = &result["structuredContent"];
    assert_eq!(health["status"], "ok");
    assert!(health["version"].is_string());
    assert!(health["uptime_seconds"].is_number());
    assert_eq!(health["bm25_indexes"][0]["collection"], "major_catalogs");
    assert_eq!(health["bm25_indexes"][0]["documents"], 3);
}

#[test]
fn test_index_stats_command() {
    let dir = tempfile::tempdir().unwrap();
    build_catalog_index(dir.path());

    let output = run_cli(dir.path(), &["index", "stats"]);
    assert!(output.status.success());
    let stats: Value = serde_json::from_slice(&output.stdout).expect("stats should be JSON");
    assert_eq!(stats["indexes"][0]["collection"], "major_catalogs");
    assert_eq!(stats["indexes"][0]["documents"], 3);
}
