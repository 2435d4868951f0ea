//! # CLI Command Implementations
//!
//! Offline commands open the store directly; only `serve` starts the bus.

use crate::api::{self, ApiSettings};
use crate::config::Config;
use crate::error::AppError;
use crate::service::{FleetService, open_store};
use fleetgraph_core::wire::ChildrenRequest;
use fleetgraph_core::{NodeEdge, NodeId, read_backup, restore, write_dump};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

// =============================================================================
// FILE SIZE LIMITS
// =============================================================================

/// Maximum backup size accepted by `restore` (500 MB).
const MAX_RESTORE_FILE_SIZE: u64 = 500 * 1024 * 1024;

/// Resolve `path` to an existing regular file no larger than `max_size`.
fn validate_input_file(path: &Path, max_size: u64) -> Result<PathBuf, AppError> {
    let canonical = path
        .canonicalize()
        .map_err(|e| AppError::Io(format!("invalid file path '{}': {e}", path.display())))?;
    let metadata = std::fs::metadata(&canonical)?;
    if !metadata.is_file() {
        return Err(AppError::Io(format!("'{}' is not a regular file", path.display())));
    }
    if metadata.len() > max_size {
        return Err(AppError::Io(format!(
            "file size {} bytes exceeds maximum allowed {max_size} bytes",
            metadata.len()
        )));
    }
    Ok(canonical)
}

/// Resolve the parent directory of an output path, which must exist.
fn validate_output_path(path: &Path) -> Result<PathBuf, AppError> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let canonical_parent = parent
        .canonicalize()
        .map_err(|e| AppError::Io(format!("invalid output directory '{}': {e}", parent.display())))?;
    if !canonical_parent.is_dir() {
        return Err(AppError::Io(format!("'{}' is not a directory", parent.display())));
    }
    let filename = path
        .file_name()
        .ok_or_else(|| AppError::Io("output path has no file name".to_string()))?;
    Ok(canonical_parent.join(filename))
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<(), AppError> {
    let text = serde_json::to_string_pretty(value).map_err(|e| AppError::Io(e.to_string()))?;
    println!("{text}");
    Ok(())
}

// =============================================================================
// SERVE
// =============================================================================

pub async fn cmd_serve(config: &Config) -> Result<(), AppError> {
    let service = Arc::new(FleetService::from_config(config)?);
    let settings = ApiSettings::from_env(config.api.rate_limit);

    println!("fleetgraph starting");
    println!("  Store:     {:?} {}", config.store.kind, config.store.path.display());
    println!("  Scheduler: every {} ms", config.scheduler.interval_ms);
    println!("  HTTP:      {}", config.api.addr());
    println!();
    println!("Press Ctrl+C to stop");

    api::run_server(&config.api.addr(), service, &settings).await
}

// =============================================================================
// STATUS
// =============================================================================

pub fn cmd_status(config: &Config, json_mode: bool) -> Result<(), AppError> {
    let store = open_store(config)?;
    let counts = store.counts()?;
    let root = store.root_id()?;
    let meta = store.meta()?;

    if json_mode {
        return print_json(&serde_json::json!({
            "store": config.store.path.to_string_lossy(),
            "node_count": counts.nodes,
            "edge_count": counts.edges,
            "root_id": root.as_ref().map(ToString::to_string),
            "schema_version": meta.schema_version,
        }));
    }

    println!("fleetgraph status");
    println!("=================");
    println!("Store:   {}", config.store.path.display());
    println!("Nodes:   {}", counts.nodes);
    println!("Edges:   {}", counts.edges);
    match root {
        Some(root) => println!("Root:    {root}"),
        None => println!("Root:    (not assigned)"),
    }
    Ok(())
}

// =============================================================================
// DUMP / RESTORE
// =============================================================================

pub fn cmd_dump(config: &Config, output: &Path) -> Result<(), AppError> {
    let output = validate_output_path(output)?;
    let store = open_store(config)?;
    let mut writer = std::io::BufWriter::new(std::fs::File::create(&output)?);
    let backup = write_dump(&store, &mut writer)?;
    writer.flush()?;
    println!(
        "Dumped {} nodes and {} edges to {}",
        backup.nodes.len(),
        backup.edges.len(),
        output.display()
    );
    Ok(())
}

pub fn cmd_restore(config: &Config, input: &Path) -> Result<(), AppError> {
    let input = validate_input_file(input, MAX_RESTORE_FILE_SIZE)?;
    let file = std::fs::File::open(&input)?;
    let backup = read_backup(std::io::BufReader::new(file))?;

    let store = open_store(config)?;
    let guard = store.lock()?;
    restore(&store, &guard, &backup)?;
    println!(
        "Restored {} nodes and {} edges from {}",
        backup.nodes.len(),
        backup.edges.len(),
        input.display()
    );
    Ok(())
}

// =============================================================================
// READS
// =============================================================================

pub fn cmd_describe(config: &Config, id: &str, parent: &str) -> Result<(), AppError> {
    let store = open_store(config)?;
    let node = store.node_edge(&NodeId::from(id), parent)?;
    print_json(&node)
}

pub fn cmd_children(
    config: &Config,
    id: &str,
    node_type: &str,
    include_deleted: bool,
    recursive: bool,
) -> Result<(), AppError> {
    let request = ChildrenRequest {
        node_type: node_type.to_string(),
        include_del: include_deleted,
        recursive,
    };
    let store = open_store(config)?;
    let nodes: Vec<NodeEdge> = store.descendants(&NodeId::from(id), &request.query()?)?;
    print_json(&nodes)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::config::StoreKind;
    use fleetgraph_core::{NodeType, Point, PointIngestor, point_type};
    use tempfile::tempdir;

    fn redb_config(path: PathBuf) -> Config {
        let mut config = Config::default();
        config.store.kind = StoreKind::Redb;
        config.store.path = path;
        config
    }

    #[test]
    fn dump_then_restore_into_a_fresh_store() {
        let dir = tempdir().expect("tempdir");
        let source = redb_config(dir.path().join("source.redb"));
        {
            let ingestor = PointIngestor::new(Arc::new(open_store(&source).expect("store")));
            let guard = ingestor.lock().expect("lock");
            ingestor
                .apply_node_points(&guard, &NodeId::from("hq"), &[Point::value("temp", 20.0)])
                .expect("root");
            ingestor
                .apply_edge_points(&guard, &NodeId::from("pump"), &NodeId::from("hq"), &[])
                .expect("edge");
            ingestor
                .apply_node_points(
                    &guard,
                    &NodeId::from("pump"),
                    &[Point::text(point_type::NODE_TYPE, NodeType::Device.as_str())],
                )
                .expect("pump");
        }

        let backup = dir.path().join("backup.json");
        cmd_dump(&source, &backup).expect("dump");

        let target = redb_config(dir.path().join("target.redb"));
        cmd_restore(&target, &backup).expect("restore");

        let store = open_store(&target).expect("store");
        assert_eq!(store.root_id().expect("root"), Some(NodeId::from("hq")));
        assert_eq!(store.counts().expect("counts").nodes, 2);
    }

    #[test]
    fn restore_rejects_missing_file() {
        let dir = tempdir().expect("tempdir");
        let config = redb_config(dir.path().join("db.redb"));
        assert!(cmd_restore(&config, &dir.path().join("missing.json")).is_err());
    }
}
