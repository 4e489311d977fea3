use crate::config::ProxyConfig;
use crate::error::Result;
use crate::registry::AccountRegistry;
use crate::relay::Relay;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info};

pub struct ProxyServer {
    listener: TcpListener,
    relay: Arc<Relay>,
    usage_report_interval: Option<Duration>,
}

impl ProxyServer {
    /// Binds the listener and builds the registry from the configured users.
    pub async fn bind(config: &ProxyConfig) -> Result<Self> {
        let registry = Arc::new(AccountRegistry::new(config.credentials()));
        let relay = Arc::new(Relay::new(registry, config.limits()));
        let listener = TcpListener::bind(&config.listen_addr).await?;

        Ok(Self {
            listener,
            relay,
            usage_report_interval: config.usage_report_interval(),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn relay(&self) -> &Arc<Relay> {
        &self.relay
    }

    /// Accepts connections until ctrl-c.
    pub async fn run(self) -> Result<()> {
        info!(
            "Proxy server listening on {} ({} users configured)",
            self.local_addr()?,
            self.relay.registry().credentials().len()
        );

        let reporter = self
            .usage_report_interval
            .map(|period| tokio::spawn(report_usage(Arc::clone(&self.relay), period)));

        loop {
            tokio::select! {
                result = self.listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            debug!("Accepted connection from {}", addr);
                            let relay = Arc::clone(&self.relay);
                            tokio::spawn(async move {
                                if let Err(e) = handle_connection(stream, relay).await {
                                    debug!("Connection from {} ended with error: {}", addr, e);
                                }
                            });
                        }
                        Err(e) => {
                            error!("Failed to accept connection: {}", e);
                        }
                    }
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("Received shutdown signal");
                    break;
                }
            }
        }

        if let Some(reporter) = reporter {
            reporter.abort();
        }
        Ok(())
    }
}

async fn handle_connection(stream: TcpStream, relay: Arc<Relay>) -> Result<()> {
    let service = service_fn(move |req| {
        let relay = Arc::clone(&relay);
        async move { Ok::<_, Infallible>(relay.handle(req).await) }
    });

    http1::Builder::new()
        .preserve_header_case(true)
        .title_case_headers(true)
        .auto_date_header(false)
        .serve_connection(TokioIo::new(stream), service)
        .with_upgrades()
        .await?;
    Ok(())
}

async fn report_usage(relay: Arc<Relay>, period: Duration) {
    let mut ticker = tokio::time::interval(period);
    // The first tick completes immediately.
    ticker.tick().await;
    loop {
        ticker.tick().await;
        for (username, usage) in relay.registry().snapshot() {
            info!(
                "[USAGE] User: {} | active: {} | data: {} bytes",
                username, usage.active_connections, usage.data_used
            );
        }
    }
}
