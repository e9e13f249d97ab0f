use clap::Parser;
use ember_server::commands;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Port to run the server on
    #[arg(long)]
    port: Option<u16>,

    /// Host to bind to
    #[arg(long)]
    host: Option<String>,

    /// Inference runtime URL (e.g. http://localhost:11434)
    #[arg(long)]
    runtime_url: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    commands::serve::run(cli.host, cli.port, cli.runtime_url).await
}
