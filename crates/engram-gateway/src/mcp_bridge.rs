//! MCP stdio server — the natural-language-first tool channel.
//!
//! Exposes the small memory tool set (write, search, branch, snapshot) as
//! an MCP server that agent hosts discover via their MCP configuration.
//!
//! Protocol: JSON-RPC 2.0 over stdin/stdout (one JSON object per line).

use std::io::Write as _;
use std::sync::Arc;

use serde_json::{json, Value};

use engram_branch::{BranchEngine, CreateBranchOptions};
use engram_core::config::EngramConfig;
use engram_embed::EmbeddingProvider;
use engram_search::{SearchEngine, SearchMode, SearchQuery};
use engram_snapshot::SnapshotEngine;
use engram_storage::Storage;
use engram_write::{FactEngine, NewFact};

struct Bridge {
    facts: FactEngine,
    search: SearchEngine,
    branches: BranchEngine,
    snapshots: SnapshotEngine,
    /// The stdio session's active branch, switched by `branch_switch`.
    active_branch: String,
}

/// Run the MCP bridge stdio loop. Blocks until stdin is closed.
pub async fn run(config: &EngramConfig) -> anyhow::Result<()> {
    // Open the store directly — no need for the full gateway stack.
    let storage = Arc::new(Storage::open(&config.database_url)?);
    let embedder: Arc<dyn EmbeddingProvider> = engram_embed::from_config(config).into();

    let mut bridge = Bridge {
        facts: FactEngine::new(storage.clone(), embedder.clone()),
        search: SearchEngine::new(storage.clone(), embedder),
        branches: BranchEngine::new(storage.clone()),
        snapshots: SnapshotEngine::new(storage),
        active_branch: config.default_branch.clone(),
    };

    let stdin = std::io::stdin();
    let stdout = std::io::stdout();
    let mut reader = std::io::BufReader::new(stdin.lock());
    let mut line = String::new();

    loop {
        line.clear();
        let bytes_read = std::io::BufRead::read_line(&mut reader, &mut line)?;
        if bytes_read == 0 {
            break; // EOF — the host closed the pipe.
        }
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let request: Value = match serde_json::from_str(trimmed) {
            Ok(v) => v,
            Err(e) => {
                write_response(
                    &stdout,
                    json!(null),
                    Some(json!({ "code": -32700, "message": format!("Parse error: {e}") })),
                    None,
                )?;
                continue;
            }
        };

        let id = request.get("id").cloned().unwrap_or(json!(null));
        let method = request.get("method").and_then(|v| v.as_str()).unwrap_or("");
        let is_notification = request.get("id").is_none();

        match method {
            "initialize" => {
                write_response(
                    &stdout,
                    id,
                    None,
                    Some(json!({
                        "protocolVersion": "2025-06-18",
                        "capabilities": { "tools": {} },
                        "serverInfo": {
                            "name": "engram",
                            "version": env!("CARGO_PKG_VERSION")
                        }
                    })),
                )?;
            }

            "notifications/initialized" => {}

            "tools/list" => {
                write_response(&stdout, id, None, Some(json!({ "tools": tool_definitions() })))?;
            }

            "tools/call" => {
                let params = request.get("params").cloned().unwrap_or(json!({}));
                let tool_name = params.get("name").and_then(|v| v.as_str()).unwrap_or("");
                let arguments = params.get("arguments").cloned().unwrap_or(json!({}));

                match execute_tool(&mut bridge, tool_name, &arguments).await {
                    Ok(content) => write_response(
                        &stdout,
                        id,
                        None,
                        Some(json!({
                            "content": [{"type": "text", "text": content}],
                            "isError": false
                        })),
                    )?,
                    Err(err_msg) => write_response(
                        &stdout,
                        id,
                        None,
                        Some(json!({
                            "content": [{"type": "text", "text": err_msg}],
                            "isError": true
                        })),
                    )?,
                }
            }

            _ => {
                if !is_notification {
                    write_response(
                        &stdout,
                        id,
                        Some(json!({ "code": -32601, "message": format!("Method not found: {method}") })),
                        None,
                    )?;
                }
            }
        }
    }

    Ok(())
}

/// Write a JSON-RPC 2.0 response to stdout.
fn write_response(
    stdout: &std::io::Stdout,
    id: Value,
    error: Option<Value>,
    result: Option<Value>,
) -> anyhow::Result<()> {
    let mut response = json!({ "jsonrpc": "2.0", "id": id });
    if let Some(e) = error {
        response["error"] = e;
    }
    if let Some(r) = result {
        response["result"] = r;
    }
    let mut out = stdout.lock();
    writeln!(out, "{response}")?;
    out.flush()?;
    Ok(())
}

fn tool_definitions() -> Value {
    json!([
        {
            "name": "memory_write",
            "description": "Persist a fact to the active memory branch. Use for durable knowledge worth recalling later: decisions, discoveries, bug fixes, patterns.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "text": { "type": "string", "description": "The fact to remember, one sentence." },
                    "category": { "type": "string", "description": "Optional category (bug_fix, architecture, pattern, decision, security, performance, general)." },
                    "confidence": { "type": "number", "description": "0.0-1.0, default 0.5." },
                    "branch": { "type": "string", "description": "Override the active branch." }
                },
                "required": ["text"]
            }
        },
        {
            "name": "memory_search",
            "description": "Hybrid keyword+vector search over the active memory branch. Use before answering questions that prior sessions may have solved.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "query": { "type": "string" },
                    "limit": { "type": "integer", "description": "Max results, default 10." },
                    "branch": { "type": "string", "description": "Override the active branch." }
                },
                "required": ["query"]
            }
        },
        {
            "name": "branch_create",
            "description": "Create a memory branch forked from an existing one (default: the active branch).",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "name": { "type": "string", "description": "Branch name, e.g. task/fix-auth or experiment/new-ranker." },
                    "parent": { "type": "string" },
                    "description": { "type": "string" }
                },
                "required": ["name"]
            }
        },
        {
            "name": "branch_list",
            "description": "List memory branches with status and parentage.",
            "inputSchema": { "type": "object", "properties": {} }
        },
        {
            "name": "branch_switch",
            "description": "Switch the active memory branch for this session.",
            "inputSchema": {
                "type": "object",
                "properties": { "name": { "type": "string" } },
                "required": ["name"]
            }
        },
        {
            "name": "snapshot_create",
            "description": "Capture the active branch's current state under a label.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "label": { "type": "string" },
                    "branch": { "type": "string" }
                },
                "required": ["label"]
            }
        },
        {
            "name": "snapshot_list",
            "description": "List snapshots, optionally for one branch.",
            "inputSchema": {
                "type": "object",
                "properties": { "branch": { "type": "string" } }
            }
        },
        {
            "name": "snapshot_restore",
            "description": "Rewrite a branch back to a snapshot's state. Destructive for rows written since.",
            "inputSchema": {
                "type": "object",
                "properties": { "snapshot_id": { "type": "string" } },
                "required": ["snapshot_id"]
            }
        }
    ])
}

async fn execute_tool(bridge: &mut Bridge, tool: &str, args: &Value) -> Result<String, String> {
    match tool {
        "memory_write" => {
            let text = args["text"].as_str().ok_or("missing 'text'")?.to_string();
            let branch = args["branch"]
                .as_str()
                .unwrap_or(&bridge.active_branch)
                .to_string();
            let fact = bridge
                .facts
                .create(NewFact {
                    text,
                    category: args["category"].as_str().unwrap_or("general").to_string(),
                    confidence: args["confidence"].as_f64().unwrap_or(0.5),
                    branch: branch.clone(),
                    source_type: Some("mcp".to_string()),
                    source_id: None,
                    session_id: None,
                    task_id: None,
                    agent_id: None,
                    metadata: None,
                })
                .await
                .map_err(|e| e.to_string())?;
            Ok(format!("Remembered on '{branch}': {} (id {})", fact.text, fact.id))
        }

        "memory_search" => {
            let query = args["query"].as_str().ok_or("missing 'query'")?.to_string();
            let branch = args["branch"]
                .as_str()
                .unwrap_or(&bridge.active_branch)
                .to_string();
            let hits = bridge
                .search
                .search(&SearchQuery {
                    query,
                    branch: branch.clone(),
                    category: None,
                    limit: args["limit"].as_u64().unwrap_or(10) as usize,
                    mode: SearchMode::Hybrid,
                    time_window_secs: None,
                })
                .await
                .map_err(|e| e.to_string())?;
            if hits.is_empty() {
                return Ok(format!("No memories matched on '{branch}'."));
            }
            let mut out = format!("{} memories on '{branch}':\n", hits.len());
            for hit in hits {
                out.push_str(&format!(
                    "- [{:.2}] ({}) {}\n",
                    hit.score, hit.fact.category, hit.fact.text
                ));
            }
            Ok(out)
        }

        "branch_create" => {
            let name = args["name"].as_str().ok_or("missing 'name'")?;
            let parent = args["parent"].as_str().unwrap_or(&bridge.active_branch);
            let branch = bridge
                .branches
                .create(
                    name,
                    parent,
                    CreateBranchOptions {
                        description: args["description"].as_str().map(String::from),
                        metadata: None,
                        entities: None,
                    },
                )
                .map_err(|e| e.to_string())?;
            Ok(format!("Created branch '{}' from '{parent}'.", branch.name))
        }

        "branch_list" => {
            let branches = bridge.branches.list(None).map_err(|e| e.to_string())?;
            let mut out = String::new();
            for b in branches {
                let marker = if b.name == bridge.active_branch { "* " } else { "  " };
                out.push_str(&format!(
                    "{marker}{} [{}] {}\n",
                    b.name,
                    b.status,
                    b.parent.as_deref().unwrap_or("-")
                ));
            }
            Ok(out)
        }

        "branch_switch" => {
            let name = args["name"].as_str().ok_or("missing 'name'")?;
            bridge.branches.get(name).map_err(|e| e.to_string())?;
            bridge.active_branch = name.to_string();
            Ok(format!("Active branch is now '{name}'."))
        }

        "snapshot_create" => {
            let label = args["label"].as_str().ok_or("missing 'label'")?;
            let branch = args["branch"].as_str().unwrap_or(&bridge.active_branch);
            let snapshot = bridge
                .snapshots
                .create(branch, label, false)
                .map_err(|e| e.to_string())?;
            Ok(format!("Snapshot '{label}' of '{branch}' (id {}).", snapshot.id))
        }

        "snapshot_list" => {
            let branch = args["branch"].as_str();
            let snapshots = bridge.snapshots.list(branch).map_err(|e| e.to_string())?;
            if snapshots.is_empty() {
                return Ok("No snapshots.".to_string());
            }
            let mut out = String::new();
            for s in snapshots {
                out.push_str(&format!("- {} '{}' on {} at {}\n", s.id, s.label, s.branch, s.created_at));
            }
            Ok(out)
        }

        "snapshot_restore" => {
            let snapshot_id = args["snapshot_id"].as_str().ok_or("missing 'snapshot_id'")?;
            bridge
                .snapshots
                .restore(snapshot_id, &tokio_util::sync::CancellationToken::new())
                .map_err(|e| e.to_string())?;
            Ok(format!("Restored snapshot {snapshot_id}."))
        }

        other => Err(format!("Unknown tool: {other}")),
    }
}
