use lsp_probe::app;
use lsp_probe::cli::Cli;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = Cli::from_args().into_config();
    match app::run(config).await {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("lsp-probe: {e:#}");
            std::process::exit(1);
        }
    }
}
