use clap::Parser;
use mini_mapreduce::mr::coordinator::ServerClient;
use mini_mapreduce::mr::function::lookup;
use mini_mapreduce::mr::rpc::socket_path;
use mini_mapreduce::mr::worker;
use tarpc::{client, tokio_serde::formats::Json};
use tracing::{error, info};

/// Runs one MapReduce worker against the coordinator's well-known socket.
#[derive(Parser, Debug)]
#[command(name = "mrworker")]
struct Args {
    /// Built-in map/reduce application to run.
    #[arg(long, default_value = "wc")]
    app: String,

    /// Override the coordinator socket path instead of deriving it from the
    /// effective uid.
    #[arg(long)]
    socket: Option<std::path::PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    let args = Args::parse();
    let (map_fn, reduce_fn) = lookup(&args.app)
        .ok_or_else(|| anyhow::anyhow!("unknown application {:?}, expected one of: wc, indexer", args.app))?;

    let socket = args.socket.clone().unwrap_or_else(socket_path);
    let transport = tarpc::serde_transport::unix::connect(&socket, Json::default).await?;
    let client = ServerClient::new(client::Config::default(), transport).spawn();
    info!(socket = %socket.display(), app = %args.app, "connected to coordinator");

    if let Err(err) = worker::run(&client, map_fn, reduce_fn).await {
        error!(%err, "worker exiting on error");
        return Err(err.into());
    }

    Ok(())
}
