use artifact_stream::{api, Config};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("artifact_stream=info,tower_http=info")),
        )
        .init();

    let config = Config::from_env()?;
    tracing::info!(
        default_total = config.default_total,
        max_total = config.max_total,
        "Starting artifact-stream {}",
        env!("CARGO_PKG_VERSION")
    );

    api::serve(config).await
}
