use tracing_subscriber::{EnvFilter, fmt};
use tracing::info;

use enrollgate::config::PortalConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Init logging
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))?;
    fmt().with_env_filter(filter).init();

    let rust_log = std::env::var("RUST_LOG").unwrap_or_else(|_| "<unset>".to_string());
    let cfg = PortalConfig::from_env()?;
    info!(
        target: "startup",
        "enrollgate starting: RUST_LOG='{}', bind={}, roster_kind={}, cookie_secure={}",
        rust_log, cfg.bind, cfg.roster.kind(), cfg.cookie_secure
    );

    enrollgate::server::run(cfg).await
}
