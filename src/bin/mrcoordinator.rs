use std::time::Duration;

use clap::Parser;
use futures::StreamExt;
use mini_mapreduce::mr::coordinator::*;
use mini_mapreduce::mr::rpc::socket_path;
use tarpc::{server::incoming::Incoming, tokio_serde::formats::Json};
use tokio::time::sleep;
use tracing::info;

/// Starts the MapReduce coordinator for a fixed set of input files.
#[derive(Parser, Debug)]
#[command(name = "mrcoordinator")]
struct Args {
    /// Input file paths; position `i` becomes map task id `i`.
    #[arg(required = true)]
    files: Vec<String>,

    /// Number of reduce partitions.
    #[arg(long = "n-reduce", default_value_t = 10)]
    n_reduce: i32,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    let args = Args::parse();
    info!(n_map = args.files.len(), n_reduce = args.n_reduce, "starting coordinator");

    let coordinator = Coordinator::new(args.files, args.n_reduce);

    let socket = socket_path();
    // A prior, crashed coordinator may have left its socket behind.
    let _ = std::fs::remove_file(&socket);

    let listener = tarpc::serde_transport::unix::listen(&socket, Json::default).await?;
    info!(socket = %socket.display(), "listening for workers");

    let server_coordinator = coordinator.clone();
    tokio::spawn(
        listener
            .filter_map(|r| async { r.ok() })
            .map(tarpc::server::BaseChannel::with_defaults)
            .execute(server_coordinator.serve()),
    );

    while !coordinator.done() {
        sleep(Duration::from_millis(500)).await;
    }

    info!("all reduce tasks acknowledged, coordinator exiting");
    let _ = std::fs::remove_file(&socket);
    Ok(())
}
