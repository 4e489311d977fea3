//! CONNECT tunnels.
//!
//! A tunnel dials the target first and only then takes the client connection
//! over through hyper's upgrade mechanism. Once established, bytes are pumped
//! in both directions through [`QuotaWriter`]s bound to the same account until
//! either side closes, the quota runs out, or the tunnel deadline passes.

use crate::account::ConnectionSlot;
use crate::error::{ProxyError, Result};
use crate::quota::{QuotaHandle, QuotaWriter};
use crate::relay::{ProxyBody, empty};
use http::{Request, Response};
use hyper::ext::ReasonPhrase;
use hyper::upgrade::OnUpgrade;
use hyper_util::rt::TokioIo;
use std::io;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{Instant, timeout, timeout_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const ESTABLISHED: &[u8] = b"Connection Established";

/// Dials the CONNECT target and, on success, schedules the tunnel to start
/// once hyper hands over the client connection.
///
/// The returned `200 Connection Established` response is what triggers the
/// upgrade. The slot is held by the tunnel task until both directions finish.
pub async fn open<B>(
    mut req: Request<B>,
    slot: ConnectionSlot,
    quota: QuotaHandle,
    time_limit: Duration,
) -> Result<Response<ProxyBody>> {
    let target = match req.uri().authority() {
        Some(authority) if authority.port().is_some() => authority.to_string(),
        _ => {
            return Err(ProxyError::BadRequest(format!(
                "CONNECT target must be host:port, got {}",
                req.uri()
            )));
        }
    };

    let upstream = match timeout(time_limit, TcpStream::connect(&target)).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(source)) => return Err(ProxyError::Dial { target, source }),
        Err(_) => {
            return Err(ProxyError::Dial {
                target,
                source: io::Error::new(io::ErrorKind::TimedOut, "dial timed out"),
            });
        }
    };

    let on_upgrade = req
        .extensions_mut()
        .remove::<OnUpgrade>()
        .ok_or(ProxyError::HijackUnsupported)?;

    tokio::spawn(async move {
        let upgraded = match on_upgrade.await {
            Ok(upgraded) => upgraded,
            Err(e) => {
                warn!("Tunnel to {} aborted before upgrade: {}", target, e);
                return;
            }
        };

        let deadline = Instant::now() + time_limit;
        let (sent, received) = splice(TokioIo::new(upgraded), upstream, quota, deadline).await;
        info!(
            "[CONNECT] Closed tunnel to {} | sent: {} bytes | received: {} bytes",
            target, sent, received
        );
        drop(slot);
    });

    let mut response = Response::new(empty());
    response
        .extensions_mut()
        .insert(ReasonPhrase::from_static(ESTABLISHED));
    Ok(response)
}

/// Pumps bytes between the client and the upstream until both directions stop.
///
/// Returns `(client -> upstream, upstream -> client)` byte counts.
async fn splice<C>(
    client: C,
    upstream: TcpStream,
    quota: QuotaHandle,
    deadline: Instant,
) -> (u64, u64)
where
    C: AsyncRead + AsyncWrite + Unpin,
{
    let (client_read, client_write) = tokio::io::split(client);
    let (upstream_read, upstream_write) = upstream.into_split();
    let closed = CancellationToken::new();

    tokio::join!(
        pump(
            client_read,
            QuotaWriter::new(upstream_write, quota.clone()),
            deadline,
            closed.clone(),
            "client -> upstream",
        ),
        pump(
            upstream_read,
            QuotaWriter::new(client_write, quota),
            deadline,
            closed.clone(),
            "upstream -> client",
        ),
    )
}

async fn pump<R, W>(
    mut src: R,
    mut dst: QuotaWriter<W>,
    deadline: Instant,
    closed: CancellationToken,
    direction: &'static str,
) -> u64
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    tokio::select! {
        result = timeout_at(deadline, tokio::io::copy(&mut src, &mut dst)) => match result {
            Ok(Ok(_)) => debug!("{} reached end of stream", direction),
            Ok(Err(e)) => debug!("{} stopped: {}", direction, e),
            Err(_) => debug!("{} hit the tunnel deadline", direction),
        },
        _ = closed.cancelled() => debug!("{} stopped by the other direction", direction),
    }

    let _ = timeout_at(deadline, dst.shutdown()).await;
    closed.cancel();
    dst.bytes_written()
}
