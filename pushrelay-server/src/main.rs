use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env file is fine; the environment may already be set.
    let _ = dotenvy::dotenv();

    // Use JSON logs in production (PUSHRELAY_LOG_JSON=1), human-readable otherwise
    let json_logs = std::env::var("PUSHRELAY_LOG_JSON").unwrap_or_default() == "1";
    let filter = EnvFilter::from_default_env().add_directive("pushrelay_server=info".parse()?);
    if json_logs {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    let config = pushrelay_server::config::RelayConfig::parse();
    if let Err(e) = config.validate() {
        tracing::error!("{e}");
        return Err(e.into());
    }

    let server = pushrelay_server::server::Server::new(config)?;
    server.run().await
}
