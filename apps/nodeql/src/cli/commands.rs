//! # CLI Command Implementations
//!
//! This module contains the actual implementations of CLI commands.

use super::{GetArgs, RenderArgs};
use crate::config::AppConfig;
use crate::error::AppError;
use crate::recorder::RecordingTransport;
use crate::transport::HttpTransport;
use nodeql_core::primitives::DEFAULT_PAGINATION_SIZE;
use nodeql_core::{
    AsyncClient, AsyncTransport, GetRequest, NodeDiff, NodeProxy, QueryBuilder,
    QueryRequest, SchemaRegistry,
};
use serde_json::{Value, json};
use std::path::Path;

/// Maximum schema document size (50 MB).
const MAX_SCHEMA_FILE_SIZE: u64 = 50 * 1024 * 1024;

/// Read a schema document, refusing oversized files.
fn read_schema(path: &Path) -> Result<String, AppError> {
    let metadata = std::fs::metadata(path)?;
    if metadata.len() > MAX_SCHEMA_FILE_SIZE {
        return Err(AppError::Argument(format!(
            "Schema file {} is {} bytes, maximum is {}",
            path.display(),
            metadata.len(),
            MAX_SCHEMA_FILE_SIZE
        )));
    }
    Ok(std::fs::read_to_string(path)?)
}

fn print_json(value: &Value) {
    println!("{}", serde_json::to_string_pretty(value).unwrap_or_default());
}

// =============================================================================
// SCHEMA COMMAND
// =============================================================================

/// Load a schema document and list what it declares.
pub fn cmd_schema_check(file: &Path, json_mode: bool) -> Result<(), AppError> {
    let registry = SchemaRegistry::from_json(&read_schema(file)?)?;

    if json_mode {
        let nodes: Vec<Value> = registry
            .nodes()
            .iter()
            .map(|node| {
                json!({
                    "kind": node.kind,
                    "attributes": node.attributes.len(),
                    "relationships": node.relationships.len(),
                    "inherit_from": node.inherit_from,
                })
            })
            .collect();
        print_json(&json!({
            "version": registry.version(),
            "nodes": nodes,
            "generics": registry.generic_kinds().collect::<Vec<_>>(),
        }));
        return Ok(());
    }

    println!("Schema {}", file.display());
    println!("==========");
    if let Some(version) = registry.version() {
        println!("Version: {}", version);
    }
    println!();
    println!("Nodes:");
    for node in registry.nodes() {
        println!(
            "  {:<32} {} attributes, {} relationships",
            node.kind,
            node.attributes.len(),
            node.relationships.len()
        );
    }
    println!();
    println!("Generics:");
    for generic in registry.generic_kinds() {
        let implementers = registry.implementers(generic)?;
        println!("  {:<32} {} implementers", generic, implementers.len());
    }

    Ok(())
}

// =============================================================================
// QUERY COMMAND
// =============================================================================

/// Split `key=value`; the value is JSON when it parses, a string otherwise.
pub fn parse_filter(raw: &str) -> Result<(String, Value), AppError> {
    let (key, value) = raw
        .split_once('=')
        .filter(|(key, _)| !key.is_empty())
        .ok_or_else(|| AppError::Argument(format!("filter '{raw}' is not key=value")))?;
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((key.to_string(), value))
}

/// Read request described by the render arguments.
pub fn render_request(args: &RenderArgs) -> Result<QueryRequest, AppError> {
    let mut request = QueryRequest::new(&args.kind);
    for raw in &args.filters {
        let (key, value) = parse_filter(raw)?;
        request = request.filter(key, value);
    }
    for path in &args.include {
        request = request.include(path);
    }
    for path in &args.exclude {
        request = request.exclude(path);
    }
    if let Some(depth) = args.depth {
        request = request.depth(depth);
    }
    if args.offset.is_some() || args.limit.is_some() {
        request = request.paginate(
            args.offset.unwrap_or(0),
            args.limit.unwrap_or(DEFAULT_PAGINATION_SIZE),
        );
    }
    if let Some(branch) = &args.branch {
        request = request.branch(branch);
    }
    Ok(request)
}

/// Print the query for the render arguments. Nothing is sent.
pub fn cmd_query_render(args: &RenderArgs, json_mode: bool) -> Result<(), AppError> {
    let registry = SchemaRegistry::from_json(&read_schema(&args.schema)?)?;
    let built = QueryBuilder::new(&registry).build(&render_request(args)?)?;

    if json_mode {
        print_json(&json!({
            "branch": built.branch,
            "body": built,
        }));
    } else {
        println!("{}", built.query);
    }
    Ok(())
}

// =============================================================================
// REMOTE COMMANDS
// =============================================================================

/// Fetch one node by id or HFID.
pub async fn cmd_get(config: &AppConfig, args: &GetArgs, json_mode: bool) -> Result<(), AppError> {
    let raw = read_schema(&args.schema)?;
    let http = HttpTransport::new(config)?;

    match &config.recorder_directory {
        Some(directory) => {
            let client = AsyncClient::new(
                RecordingTransport::new(http, directory.clone()),
                config.client_config(),
            );
            get_node(&client, &raw, args, json_mode).await
        }
        None => {
            let client = AsyncClient::new(http, config.client_config());
            get_node(&client, &raw, args, json_mode).await
        }
    }
}

async fn get_node<T: AsyncTransport>(
    client: &AsyncClient<T>,
    raw_schema: &str,
    args: &GetArgs,
    json_mode: bool,
) -> Result<(), AppError> {
    client.load_schema(args.branch.as_deref(), raw_schema)?;

    let mut request = GetRequest::new(&args.kind);
    if let Some(id) = &args.id {
        request = request.id(id);
    }
    if !args.hfid.is_empty() {
        request = request.hfid(args.hfid.clone());
    }
    if let Some(depth) = args.depth {
        request = request.depth(depth);
    }
    if let Some(branch) = &args.branch {
        request = request.branch(branch);
    }

    if let Some(node) = client.get(&request).await? {
        print_node(&node, json_mode);
    }
    Ok(())
}

fn print_node(node: &NodeProxy, json_mode: bool) {
    let snapshot = node.snapshot();
    let attributes = snapshot.attribute_values();

    if json_mode {
        print_json(&json!({
            "id": snapshot.id,
            "kind": snapshot.kind,
            "display_label": snapshot.display_label,
            "hfid": snapshot.hfid,
            "attributes": attributes,
        }));
        return;
    }

    println!(
        "{} {}",
        snapshot.kind,
        snapshot.id.as_deref().unwrap_or("(unsaved)")
    );
    if let Some(label) = &snapshot.display_label {
        println!("Label: {}", label);
    }
    for (name, value) in &attributes {
        println!("  {:<24} {}", name, value);
    }
}

/// Print the change summary of `branch`.
pub async fn cmd_diff(config: &AppConfig, branch: &str, json_mode: bool) -> Result<(), AppError> {
    let http = HttpTransport::new(config)?;

    let diffs = match &config.recorder_directory {
        Some(directory) => {
            let client = AsyncClient::new(
                RecordingTransport::new(http, directory.clone()),
                config.client_config(),
            );
            client.diff_summary(Some(branch)).await?
        }
        None => {
            let client = AsyncClient::new(http, config.client_config());
            client.diff_summary(Some(branch)).await?
        }
    };

    if json_mode {
        print_json(&serde_json::to_value(&diffs).unwrap_or_default());
        return Ok(());
    }
    print_diffs(branch, &diffs);
    Ok(())
}

fn print_diffs(branch: &str, diffs: &[NodeDiff]) {
    println!("Branch {}: {} changed nodes", branch, diffs.len());
    for diff in diffs {
        println!();
        println!(
            "{:<8} {} {} ({})",
            diff.action, diff.kind, diff.display_label, diff.id
        );
        for element in &diff.elements {
            println!(
                "  {:<8} {:<24} +{} ~{} -{}",
                element.action,
                element.name,
                element.summary.added,
                element.summary.updated,
                element.summary.removed
            );
        }
    }
}
