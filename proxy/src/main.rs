use anyhow::{Context, Result};
use clap::Parser;
use quota_proxy::config::ProxyConfig;
use quota_proxy::server::ProxyServer;
use quota_proxy::telemetry;
use std::path::Path;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "quota-proxy")]
#[command(about = "Authenticating HTTP/HTTPS forward proxy with per-user quotas", long_about = None)]
struct Args {
    /// Config file path
    #[arg(short, long, default_value = "proxy.toml")]
    config: String,

    /// Proxy listen address
    #[arg(long, env = "PROXY_LISTEN_ADDR")]
    listen_addr: Option<String>,

    /// Log level used when RUST_LOG is unset
    #[arg(long)]
    log_level: Option<String>,

    /// Directory for daily-rolling log files
    #[arg(long)]
    log_dir: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config_missing = !Path::new(&args.config).exists();
    let mut cfg = if config_missing {
        ProxyConfig::default()
    } else {
        ProxyConfig::load(&args.config)
            .with_context(|| format!("Failed to load config from {}", args.config))?
    };

    if let Some(listen_addr) = args.listen_addr {
        cfg.listen_addr = listen_addr;
    }
    if let Some(log_level) = args.log_level {
        cfg.log_level = log_level;
    }
    if let Some(log_dir) = args.log_dir {
        cfg.log_dir = Some(log_dir);
    }

    let _guard = telemetry::init_tracing(cfg.log_dir.as_deref(), &cfg.log_level, cfg.console_port);

    if config_missing {
        warn!("Config file {} not found, using defaults", args.config);
    }
    cfg.validate()?;
    if cfg.users.is_empty() {
        warn!("No users configured; every request will be rejected with 407");
    }
    info!("Starting proxy with configuration: {:?}", cfg);

    let server = ProxyServer::bind(&cfg)
        .await
        .with_context(|| format!("Failed to bind {}", cfg.listen_addr))?;

    if let Err(e) = server.run().await {
        error!("Proxy server error: {}", e);
        return Err(e.into());
    }

    info!("Proxy stopped");
    Ok(())
}
