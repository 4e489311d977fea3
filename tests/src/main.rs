pub mod mock_target;

use anyhow::Result;
use clap::{Parser, Subcommand};
use integration_tests::Targets;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "integration-tests")]
#[command(about = "End-to-end test tool for the quota proxy")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run integration scenarios against a running proxy
    Integration {
        /// Proxy server address
        #[arg(short, long, default_value = "127.0.0.1:8080")]
        proxy_addr: String,

        /// Username configured on the proxy
        #[arg(short, long, default_value = "admin")]
        username: String,

        /// Password for that user
        #[arg(long, default_value = "secret")]
        password: String,

        /// Mock HTTP target address, as reachable from the proxy
        #[arg(long, default_value = "127.0.0.1:9090")]
        http_target: String,

        /// Mock TCP echo target address, as reachable from the proxy
        #[arg(long, default_value = "127.0.0.1:9091")]
        tcp_target: String,

        /// Connection limit configured on the proxy
        #[arg(long, default_value = "10")]
        max_connections: usize,
    },
    /// Start mock target servers
    MockTarget {
        /// HTTP server port
        #[arg(long, default_value = "9090")]
        http_port: u16,

        /// TCP echo server port
        #[arg(long, default_value = "9091")]
        tcp_port: u16,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Integration {
            proxy_addr,
            username,
            password,
            http_target,
            tcp_target,
            max_connections,
        } => {
            tracing::info!("Running integration tests against proxy {}", proxy_addr);
            let targets = Targets {
                http: http_target,
                tcp: tcp_target,
            };
            let results = integration_tests::run_all_tests(
                &proxy_addr,
                &username,
                &password,
                &targets,
                max_connections,
            )
            .await?;
            if results.failed > 0 {
                anyhow::bail!("{} of {} tests failed", results.failed, results.total_tests);
            }
        }
        Commands::MockTarget {
            http_port,
            tcp_port,
        } => {
            tracing::info!(
                "Starting mock target servers on ports: HTTP={}, TCP={}",
                http_port,
                tcp_port
            );
            mock_target::run_mock_servers(http_port, tcp_port).await?;
        }
    }

    Ok(())
}
