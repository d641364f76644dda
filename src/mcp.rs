//! MCP (Model Context Protocol) server implementation.
//!
//! Implements the JSON-RPC 2.0 protocol over stdio, exposing the job surface
//! (submit, status, results, cancel, listing) plus one-off title resolution,
//! entry lookups and stored artifacts as tools for AI agent integration.

use crate::error::{HarvestError, Result};
use crate::orchestrator::Orchestrator;
use crate::resolver::Resolution;
use crate::types::{ArtifactKind, Entry};
use serde::Serialize;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{debug, info};

/// Run the MCP server over stdin/stdout until stdin closes.
pub async fn run_server(orchestrator: Orchestrator) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    info!("MCP server listening on stdio");

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        if let Some(response) = handle_message(&orchestrator, &line).await {
            let mut out = response.to_string();
            out.push('\n');
            stdout.write_all(out.as_bytes()).await?;
            stdout.flush().await?;
        }
    }

    info!("stdin closed, MCP server stopping");
    Ok(())
}

/// Handle one JSON-RPC line. Notifications produce no response.
pub async fn handle_message(orchestrator: &Orchestrator, line: &str) -> Option<Value> {
    let request: Value = match serde_json::from_str(line) {
        Ok(v) => v,
        Err(e) => {
            return Some(json!({
                "jsonrpc": "2.0",
                "id": null,
                "error": { "code": -32700, "message": format!("Parse error: {}", e) }
            }));
        }
    };

    let id = request.get("id").cloned().unwrap_or(Value::Null);
    let method = request["method"].as_str().unwrap_or("");
    debug!(method, "MCP request");

    let response = match method {
        "initialize" => handle_initialize(&id),
        "tools/list" => handle_tools_list(&id),
        "tools/call" => handle_tool_call(orchestrator, &id, &request["params"]).await,
        "ping" => json!({ "jsonrpc": "2.0", "id": id, "result": {} }),
        m if m.starts_with("notifications/") => return None,
        _ => json!({
            "jsonrpc": "2.0",
            "id": id,
            "error": { "code": -32601, "message": format!("Method not found: {}", method) }
        }),
    };
    Some(response)
}

fn handle_initialize(id: &Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "result": {
            "protocolVersion": "2024-11-05",
            "capabilities": {
                "tools": {}
            },
            "serverInfo": {
                "name": "refharvest-mcp",
                "version": env!("CARGO_PKG_VERSION")
            }
        }
    })
}

fn handle_tools_list(id: &Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "result": {
            "tools": tool_definitions()
        }
    })
}

async fn handle_tool_call(orchestrator: &Orchestrator, id: &Value, params: &Value) -> Value {
    let tool_name = params["name"].as_str().unwrap_or("");
    let args = &params["arguments"];

    let result = match tool_name {
        "submit_citations" => tool_submit(orchestrator, args).await,
        "get_job" => tool_get_job(orchestrator, args).await,
        "list_job_results" => tool_list_job_results(orchestrator, args).await,
        "cancel_job" => tool_cancel_job(orchestrator, args).await,
        "list_jobs" => tool_list_jobs(orchestrator, args).await,
        "resolve_title" => tool_resolve_title(orchestrator, args).await,
        "search_entries" => tool_search_entries(orchestrator, args).await,
        "get_entry" => tool_get_entry(orchestrator, args).await,
        "list_failed_entries" => tool_list_failed_entries(orchestrator).await,
        "read_artifact" => tool_read_artifact(orchestrator, args).await,
        _ => Err(HarvestError::InvalidInput(format!("Unknown tool: {}", tool_name))),
    };

    match result {
        Ok(content) => json!({
            "jsonrpc": "2.0",
            "id": id,
            "result": {
                "content": [{ "type": "text", "text": content }]
            }
        }),
        Err(e) => json!({
            "jsonrpc": "2.0",
            "id": id,
            "result": {
                "content": [{ "type": "text", "text": format!("Error: {}", e) }],
                "isError": true
            }
        }),
    }
}

// --- Tool implementations ---

fn required_str<'a>(args: &'a Value, name: &str) -> Result<&'a str> {
    args[name]
        .as_str()
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| HarvestError::InvalidInput(format!("'{}' parameter required", name)))
}

fn to_json<T: Serialize>(value: &T) -> Result<String> {
    Ok(serde_json::to_string_pretty(value)?)
}

async fn tool_submit(orchestrator: &Orchestrator, args: &Value) -> Result<String> {
    let text = required_str(args, "text")?;
    let submitted = orchestrator.submit(text).await?;
    to_json(&submitted)
}

async fn tool_get_job(orchestrator: &Orchestrator, args: &Value) -> Result<String> {
    let job_id = required_str(args, "job_id")?;
    to_json(&orchestrator.get_job(job_id).await?)
}

async fn tool_list_job_results(orchestrator: &Orchestrator, args: &Value) -> Result<String> {
    let job_id = required_str(args, "job_id")?;
    to_json(&orchestrator.list_job_results(job_id).await?)
}

async fn tool_cancel_job(orchestrator: &Orchestrator, args: &Value) -> Result<String> {
    let job_id = required_str(args, "job_id")?;
    to_json(&orchestrator.cancel(job_id).await?)
}

async fn tool_list_jobs(orchestrator: &Orchestrator, args: &Value) -> Result<String> {
    let limit = args["limit"].as_u64().map(|l| l as usize);
    let jobs = orchestrator.list_jobs(limit).await?;
    // Source text can be long; listings only carry the counters.
    let rows: Vec<Value> = jobs
        .iter()
        .map(|r| {
            json!({
                "job_id": r.job.job_id,
                "status": r.job.status,
                "total_items": r.job.total_items,
                "completed_count": r.job.completed_count,
                "failed_count": r.job.failed_count,
                "progress_percentage": r.progress_percentage,
                "created_at": r.job.created_at,
            })
        })
        .collect();
    to_json(&rows)
}

async fn tool_resolve_title(orchestrator: &Orchestrator, args: &Value) -> Result<String> {
    let title = required_str(args, "title")?;
    let author = args["author"].as_str().filter(|a| !a.trim().is_empty());

    match orchestrator.resolve_title(title, author).await? {
        Resolution::Matched { record, strategy } => {
            let mut out = format!("**{}**\n", record.title);
            out.push_str(&format!("PMID: {} (strategy {})\n", record.id, strategy + 1));
            if !record.authors.is_empty() {
                out.push_str(&format!("Authors: {}\n", record.authors.join(", ")));
            }
            if let Some(journal) = &record.journal {
                out.push_str(&format!("Journal: {}\n", journal));
            }
            if let Some(year) = record.year {
                out.push_str(&format!("Year: {}\n", year));
            }
            if let Some(doi) = &record.doi {
                out.push_str(&format!("DOI: {}\n", doi));
            }
            Ok(out)
        }
        Resolution::NotFound => Ok(format!("No PubMed match for: {}", title)),
    }
}

fn format_entries(entries: &[Entry]) -> String {
    let mut out = format!("Found {} entries:\n\n", entries.len());
    for (i, entry) in entries.iter().enumerate() {
        let title = entry.matched_title.as_deref().unwrap_or(&entry.query_title);
        out.push_str(&format!(
            "{}. {} [{}]\n   First author: {}\n",
            i + 1,
            title,
            entry.status,
            entry.first_author
        ));
        if let Some(id) = &entry.canonical_id {
            let a = entry.artifacts;
            out.push_str(&format!(
                "   PMID: {}  text: {}  pdf: {}  references: {}\n",
                id, a.text, a.pdf, a.references
            ));
        }
        out.push('\n');
    }
    out
}

async fn tool_search_entries(orchestrator: &Orchestrator, args: &Value) -> Result<String> {
    let query = args["query"].as_str().unwrap_or("");
    let entries = orchestrator.search_entries(query).await?;
    Ok(format_entries(&entries))
}

async fn tool_get_entry(orchestrator: &Orchestrator, args: &Value) -> Result<String> {
    let pmid = required_str(args, "pmid")?;
    to_json(&orchestrator.get_entry(pmid).await?)
}

async fn tool_list_failed_entries(orchestrator: &Orchestrator) -> Result<String> {
    let entries = orchestrator.failed_entries().await?;
    let mut out = format_entries(&entries);
    for entry in &entries {
        out.push_str(&format!("---\n{}\n", entry.raw_text));
    }
    Ok(out)
}

async fn tool_read_artifact(orchestrator: &Orchestrator, args: &Value) -> Result<String> {
    let pmid = required_str(args, "pmid")?;
    let kind: ArtifactKind = args["kind"]
        .as_str()
        .unwrap_or("text")
        .parse()
        .map_err(HarvestError::InvalidInput)?;

    let bytes = orchestrator.read_artifact(pmid, kind).await?;
    match kind {
        // Binary; report its size rather than dumping it into the conversation.
        ArtifactKind::Pdf => Ok(format!("PDF for PMID {} is stored ({} bytes)", pmid, bytes.len())),
        ArtifactKind::Text | ArtifactKind::References => {
            Ok(String::from_utf8_lossy(&bytes).into_owned())
        }
    }
}

// --- Tool definitions ---

fn tool_definitions() -> Value {
    json!([
        {
            "name": "submit_citations",
            "description": "Submit a pasted reference list. Returns a job id immediately; citations are resolved against PubMed in the background.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "text": { "type": "string", "description": "Reference section, one citation per numbered item or paragraph" }
                },
                "required": ["text"]
            },
            "annotations": {
                "readOnlyHint": false,
                "destructiveHint": false,
                "idempotentHint": false,
                "openWorldHint": true
            }
        },
        {
            "name": "get_job",
            "description": "Status, counters and progress percentage of a job.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "job_id": { "type": "string", "description": "Job id returned by submit_citations" }
                },
                "required": ["job_id"]
            },
            "annotations": {
                "readOnlyHint": true,
                "destructiveHint": false,
                "idempotentHint": true,
                "openWorldHint": false
            }
        },
        {
            "name": "list_job_results",
            "description": "Per-citation results of a job, ordered by position in the submitted text.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "job_id": { "type": "string", "description": "Job id" }
                },
                "required": ["job_id"]
            },
            "annotations": {
                "readOnlyHint": true,
                "destructiveHint": false,
                "idempotentHint": true,
                "openWorldHint": false
            }
        },
        {
            "name": "cancel_job",
            "description": "Ask a job to stop after the citation it is currently processing.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "job_id": { "type": "string", "description": "Job id" }
                },
                "required": ["job_id"]
            },
            "annotations": {
                "readOnlyHint": false,
                "destructiveHint": true,
                "idempotentHint": true,
                "openWorldHint": false
            }
        },
        {
            "name": "list_jobs",
            "description": "Most recent jobs first.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "limit": { "type": "integer", "description": "Max jobs (default and cap 20)", "default": 20 }
                }
            },
            "annotations": {
                "readOnlyHint": true,
                "destructiveHint": false,
                "idempotentHint": true,
                "openWorldHint": false
            }
        },
        {
            "name": "resolve_title",
            "description": "Resolve a single article title to a PubMed record without creating a job.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "title": { "type": "string", "description": "Article title as cited" },
                    "author": { "type": "string", "description": "Optional first author surname to narrow the search" }
                },
                "required": ["title"]
            },
            "annotations": {
                "readOnlyHint": true,
                "destructiveHint": false,
                "idempotentHint": true,
                "openWorldHint": true
            }
        },
        {
            "name": "search_entries",
            "description": "Search stored entries by title, first author or PMID.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "query": { "type": "string", "description": "Case-insensitive substring; empty lists everything" }
                }
            },
            "annotations": {
                "readOnlyHint": true,
                "destructiveHint": false,
                "idempotentHint": true,
                "openWorldHint": false
            }
        },
        {
            "name": "get_entry",
            "description": "Get the stored entry for a PMID, including which artifacts were retrieved.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "pmid": { "type": "string", "description": "PubMed ID" }
                },
                "required": ["pmid"]
            },
            "annotations": {
                "readOnlyHint": true,
                "destructiveHint": false,
                "idempotentHint": true,
                "openWorldHint": false
            }
        },
        {
            "name": "list_failed_entries",
            "description": "List entries whose PubMed search or retrieval did not succeed, with their original citation text.",
            "inputSchema": {
                "type": "object",
                "properties": {}
            },
            "annotations": {
                "readOnlyHint": true,
                "destructiveHint": false,
                "idempotentHint": true,
                "openWorldHint": false
            }
        },
        {
            "name": "read_artifact",
            "description": "Read a stored artifact for a PMID. Text and reference lists are returned as text; for PDFs only the size is reported.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "pmid": { "type": "string", "description": "PubMed ID" },
                    "kind": {
                        "type": "string",
                        "enum": ["text", "pdf", "references"],
                        "description": "Artifact to read (default: text)"
                    }
                },
                "required": ["pmid"]
            },
            "annotations": {
                "readOnlyHint": true,
                "destructiveHint": false,
                "idempotentHint": true,
                "openWorldHint": false
            }
        }
    ])
}
