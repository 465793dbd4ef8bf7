use anyhow::Result;
use clap::Parser;

use kubesolo_cluster::cli::ClusterCmd;

/// Install and tear down single-node KubeSolo clusters on CI runners
#[derive(Debug, Parser)]
#[command(name = "kubesolo-setup", version, about)]
struct Root {
    #[command(subcommand)]
    cmd: ClusterCmd,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    init_tracer();
    Root::parse().cmd.process().await
}

fn init_tracer() {
    use tracing_subscriber::EnvFilter;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();
}
