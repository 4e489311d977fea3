use anyhow::{Context, Result};
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};

pub const SLOW_DELAY: Duration = Duration::from_secs(1);
pub const LARGE_BODY_LEN: usize = 1024 * 1024;

async fn bind_local(port: u16) -> Result<TcpListener> {
    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind mock target on {}", addr))
}

/// Serves the HTTP target endpoints on `listener` until the task is dropped.
pub async fn serve_http(listener: TcpListener) -> Result<()> {
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!("HTTP target accept failed: {}", e);
                continue;
            }
        };
        tokio::spawn(async move {
            let served = http1::Builder::new()
                .serve_connection(TokioIo::new(stream), service_fn(respond))
                .await;
            if let Err(e) = served {
                debug!("HTTP target connection from {} failed: {}", peer, e);
            }
        });
    }
}

/// Echoes every TCP connection accepted on `listener` back to its sender.
pub async fn serve_echo(listener: TcpListener) -> Result<()> {
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!("Echo target accept failed: {}", e);
                continue;
            }
        };
        debug!("Echo target accepted {}", peer);
        tokio::spawn(async move {
            match echo(stream).await {
                Ok(bytes) => debug!("Echoed {} bytes to {}", bytes, peer),
                Err(e) => error!("Echo to {} failed: {}", peer, e),
            }
        });
    }
}

async fn echo(mut stream: TcpStream) -> std::io::Result<u64> {
    let (mut reader, mut writer) = stream.split();
    tokio::io::copy(&mut reader, &mut writer).await
}

async fn respond(req: Request<Incoming>) -> Result<Response<Full<Bytes>>, Infallible> {
    let (parts, body) = req.into_parts();
    debug!("HTTP target: {} {}", parts.method, parts.uri);

    let (status, payload) = match (&parts.method, parts.uri.path()) {
        (_, "/health") => (StatusCode::OK, Bytes::from_static(b"OK")),
        (&Method::POST, "/echo") => match body.collect().await {
            Ok(collected) => (StatusCode::OK, collected.to_bytes()),
            Err(e) => (StatusCode::BAD_REQUEST, Bytes::from(e.to_string())),
        },
        (_, "/slow") => {
            tokio::time::sleep(SLOW_DELAY).await;
            (StatusCode::OK, Bytes::from_static(b"slow"))
        }
        (_, "/large") => (StatusCode::OK, Bytes::from(vec![b'A'; LARGE_BODY_LEN])),
        _ => (StatusCode::NOT_FOUND, Bytes::from_static(b"Not Found")),
    };

    let mut response = Response::new(Full::new(payload));
    *response.status_mut() = status;
    Ok(response)
}

/// Runs the HTTP and echo targets until either fails or ctrl-c arrives.
pub async fn run_mock_servers(http_port: u16, tcp_port: u16) -> Result<()> {
    let http = bind_local(http_port).await?;
    let tcp = bind_local(tcp_port).await?;
    info!(
        "Mock targets listening: http on {}, echo on {}",
        http.local_addr()?,
        tcp.local_addr()?
    );

    tokio::select! {
        res = serve_http(http) => res.context("HTTP target stopped"),
        res = serve_echo(tcp) => res.context("Echo target stopped"),
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    async fn spawn_http() -> SocketAddr {
        let listener = bind_local(0).await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(serve_http(listener));
        addr
    }

    async fn send(addr: SocketAddr, method: Method, path: &str, body: Bytes) -> (StatusCode, Bytes) {
        let stream = TcpStream::connect(addr).await.unwrap();
        let (mut sender, conn) = hyper::client::conn::http1::handshake(TokioIo::new(stream))
            .await
            .unwrap();
        tokio::spawn(conn);
        let req = Request::builder()
            .method(method)
            .uri(path)
            .header("Host", addr.to_string())
            .body(Full::new(body))
            .unwrap();
        let res = sender.send_request(req).await.unwrap();
        let status = res.status();
        (status, res.collect().await.unwrap().to_bytes())
    }

    #[tokio::test]
    async fn health_and_unknown_paths() {
        let addr = spawn_http().await;
        assert_eq!(
            send(addr, Method::GET, "/health", Bytes::new()).await,
            (StatusCode::OK, Bytes::from("OK"))
        );
        assert_eq!(
            send(addr, Method::GET, "/missing", Bytes::new()).await.0,
            StatusCode::NOT_FOUND
        );
    }

    #[tokio::test]
    async fn echo_returns_posted_body() {
        let addr = spawn_http().await;
        let (status, body) = send(addr, Method::POST, "/echo", Bytes::from("ping")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, Bytes::from("ping"));
    }

    #[tokio::test]
    async fn large_body_has_expected_length() {
        let addr = spawn_http().await;
        let (status, body) = send(addr, Method::GET, "/large", Bytes::new()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.len(), LARGE_BODY_LEN);
    }

    #[tokio::test]
    async fn tcp_echo_returns_input() {
        let listener = bind_local(0).await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(serve_echo(listener));

        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(b"echo me").await.unwrap();
        stream.shutdown().await.unwrap();
        let mut out = Vec::new();
        stream.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, b"echo me");
    }
}
