//! flowmeshd — the flowmesh worker daemon.
//!
//! Single binary that runs one worker's autoscaling sidecar against an
//! in-process coordination store:
//! - Pipeline definition loaded from a TOML file
//! - Edge election + discovery census + scaling loops (flowmesh-stream)
//! - Worker events logged to the console
//!
//! # Usage
//!
//! ```text
//! flowmeshd worker --pipeline pipeline.toml --node A --job-id demo
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::sync::broadcast;
use tracing::{debug, info};
use uuid::Uuid;

use flowmesh_core::{PipelineDef, StreamConfig};
use flowmesh_store::MemoryStore;
use flowmesh_stream::{StreamService, WorkerContext};

#[derive(Parser)]
#[command(name = "flowmeshd", about = "flowmesh worker daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run one worker in standalone mode (in-process coordination store).
    Worker {
        /// Pipeline definition file (TOML).
        #[arg(long)]
        pipeline: PathBuf,

        /// The pipeline node this worker runs.
        #[arg(long)]
        node: String,

        /// Job this worker belongs to.
        #[arg(long, default_value = "local")]
        job_id: String,

        /// Worker id; generated when omitted.
        #[arg(long)]
        worker_id: Option<String>,

        /// Address published in the discovery record.
        #[arg(long, default_value = "127.0.0.1:9020")]
        address: String,

        /// Worker configuration file (TOML); defaults apply when omitted.
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,flowmeshd=debug,flowmesh=debug".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Worker {
            pipeline,
            node,
            job_id,
            worker_id,
            address,
            config,
        } => run_worker(pipeline, node, job_id, worker_id, address, config).await,
    }
}

async fn run_worker(
    pipeline_path: PathBuf,
    node: String,
    job_id: String,
    worker_id: Option<String>,
    address: String,
    config_path: Option<PathBuf>,
) -> anyhow::Result<()> {
    info!("flowmesh worker starting in standalone mode");

    let config = match config_path {
        Some(path) => StreamConfig::from_file(&path)?,
        None => StreamConfig::default(),
    };
    let pipeline = load_pipeline(&pipeline_path)?;
    let worker_id = worker_id.unwrap_or_else(|| Uuid::new_v4().to_string());

    // Standalone mode: the store lives in this process, seeded from the
    // pipeline file.
    let store = MemoryStore::new();
    store.put_pipeline(&job_id, pipeline).await;
    info!(job = %job_id, node = %node, worker = %worker_id, "pipeline definition seeded");

    let service = StreamService::start(
        Arc::new(store),
        WorkerContext {
            job_id,
            worker_id,
            node_name: node,
            address,
            config,
        },
    )
    .await?;

    // Echo the event bus; an embedding wrapper would consume this instead.
    let mut events = service.subscribe();
    let events_handle = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => debug!(?event, "worker event"),
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    // Graceful shutdown on Ctrl-C.
    tokio::signal::ctrl_c()
        .await
        .expect("failed to install CTRL+C handler");
    info!("shutdown signal received");

    service.stop().await;
    let _ = events_handle.await;

    info!("flowmesh worker stopped");
    Ok(())
}

fn load_pipeline(path: &Path) -> anyhow::Result<PipelineDef> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("reading pipeline file {}", path.display()))?;
    Ok(toml::from_str(&content)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pipeline_file_parses_nodes_and_edges() {
        let dir = std::env::temp_dir().join("flowmeshd-test-pipeline");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("pipeline.toml");
        std::fs::write(
            &path,
            r#"
            [[nodes]]
            node_name = "A"
            algorithm_name = "alg-a"
            state_type = "stateful"
            kind = "algorithm"
            parents = []
            children = ["D"]
            input = []

            [[nodes]]
            node_name = "D"
            algorithm_name = "alg-d"
            state_type = "stateless"
            kind = "algorithm"
            min_replicas = 1
            parents = ["A"]
            children = []
            input = [{ stream = "s1" }]

            [[edges]]
            source = "A"
            target = "D"
            "#,
        )
        .unwrap();

        let pipeline = load_pipeline(&path).unwrap();
        assert_eq!(pipeline.nodes.len(), 2);
        assert_eq!(pipeline.edges.len(), 1);

        let d = pipeline.node("D").unwrap();
        assert_eq!(d.min_replicas, Some(1));
        assert_eq!(d.parents, vec!["A".to_string()]);
        assert_eq!(d.input, vec![serde_json::json!({"stream": "s1"})]);

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn missing_pipeline_file_names_the_path() {
        let err = load_pipeline(Path::new("/nonexistent/pipeline.toml"))
            .err()
            .unwrap()
            .to_string();
        assert!(err.contains("/nonexistent/pipeline.toml"), "got: {err}");
    }
}
