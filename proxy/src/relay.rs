use crate::account::{AdmissionError, ConnectionSlot, Limits};
use crate::auth;
use crate::error::{ProxyError, Result};
use crate::quota::{DeadlineExceeded, QuotaBody, QuotaHandle};
use crate::registry::AccountRegistry;
use crate::tunnel;
use bytes::Bytes;
use http::header::{
    HOST, HeaderMap, HeaderName, HeaderValue, PROXY_AUTHENTICATE, PROXY_AUTHORIZATION,
};
use http::{Method, Request, Response, StatusCode, Uri};
use http_body_util::{BodyExt, Empty, Full, combinators::UnsyncBoxBody};
use hyper::body::Body;
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use std::io;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

pub use crate::quota::BoxError;

pub type ProxyBody = UnsyncBoxBody<Bytes, BoxError>;

const PROXY_CONNECTION: HeaderName = HeaderName::from_static("proxy-connection");
const BASIC_CHALLENGE: &str = "Basic realm=\"proxy\"";

pub fn full<T: Into<Bytes>>(chunk: T) -> ProxyBody {
    Full::new(chunk.into())
        .map_err(|never| match never {})
        .boxed_unsync()
}

pub fn empty() -> ProxyBody {
    Empty::<Bytes>::new()
        .map_err(|never| match never {})
        .boxed_unsync()
}

/// Authenticates, admits and dispatches proxy requests.
pub struct Relay {
    registry: Arc<AccountRegistry>,
    limits: Limits,
    client: Client<HttpConnector, ProxyBody>,
}

impl Relay {
    pub fn new(registry: Arc<AccountRegistry>, limits: Limits) -> Self {
        let mut connector = HttpConnector::new();
        connector.set_connect_timeout(Some(limits.time_limit));
        let client = Client::builder(TokioExecutor::new())
            .http1_preserve_header_case(true)
            .http1_title_case_headers(true)
            .build(connector);

        Self {
            registry,
            limits,
            client,
        }
    }

    pub fn registry(&self) -> &Arc<AccountRegistry> {
        &self.registry
    }

    /// Serves one request; failures become plain-text error responses.
    pub async fn handle<B>(&self, req: Request<B>) -> Response<ProxyBody>
    where
        B: Body<Data = Bytes> + Send + Unpin + 'static,
        B::Error: Into<BoxError>,
    {
        match self.dispatch(req).await {
            Ok(response) => response,
            Err(err) => {
                if err.status() == StatusCode::INTERNAL_SERVER_ERROR {
                    error!("Request failed: {}", err);
                } else {
                    warn!("Request rejected: {}", err);
                }
                error_response(&err)
            }
        }
    }

    async fn dispatch<B>(&self, req: Request<B>) -> Result<Response<ProxyBody>>
    where
        B: Body<Data = Bytes> + Send + Unpin + 'static,
        B::Error: Into<BoxError>,
    {
        let username = auth::authenticate(
            req.headers().get(PROXY_AUTHORIZATION),
            self.registry.credentials(),
        )?;

        let account = self.registry.get_or_create(&username);
        let slot = account.admit(&self.limits).map_err(|err| match err {
            AdmissionError::QuotaExceeded => ProxyError::QuotaExceeded(username.clone()),
            AdmissionError::ConnectionLimitExceeded => {
                ProxyError::ConnectionLimitExceeded(username.clone())
            }
        })?;
        let quota = QuotaHandle::new(account, self.limits.data_limit);

        if req.method() == Method::CONNECT {
            info!("[CONNECT] User: {} | Target: {}", username, req.uri());
            tunnel::open(req, slot, quota, self.limits.time_limit).await
        } else {
            info!("[HTTP] User: {} | Target: {}", username, req.uri());
            self.forward(req, slot, quota).await
        }
    }

    async fn forward<B>(
        &self,
        req: Request<B>,
        slot: ConnectionSlot,
        quota: QuotaHandle,
    ) -> Result<Response<ProxyBody>>
    where
        B: Body<Data = Bytes> + Send + Unpin + 'static,
        B::Error: Into<BoxError>,
    {
        let (mut parts, body) = req.into_parts();
        parts.headers.remove(PROXY_AUTHORIZATION);
        parts.headers.remove(PROXY_CONNECTION);
        parts.uri = absolute_target(&parts.uri, &parts.headers)?;

        // One deadline covers the upstream exchange, response body included.
        let deadline = Instant::now() + self.limits.time_limit;
        let target = parts.uri.to_string();
        let body = QuotaBody::new(body, quota.clone())
            .with_deadline(deadline)
            .boxed_unsync();
        let upstream = Request::from_parts(parts, body);

        let response =
            match tokio::time::timeout_at(deadline, self.client.request(upstream)).await {
                Ok(Ok(response)) => response,
                Ok(Err(err)) if is_timeout(&err) => return Err(ProxyError::Timeout(target)),
                Ok(Err(err)) => {
                    debug!("Upstream request to {} failed: {:?}", target, err);
                    return Err(ProxyError::UpstreamUnreachable(target));
                }
                Err(_) => return Err(ProxyError::Timeout(target)),
            };

        // The slot stays held until the response body is fully relayed.
        let (parts, body) = response.into_parts();
        let body = QuotaBody::new(body, quota)
            .holding(slot)
            .with_deadline(deadline)
            .boxed_unsync();
        Ok(Response::from_parts(parts, body))
    }
}

/// Turns the request target into an absolute `http` URI, falling back to the
/// `Host` header for origin-form targets.
fn absolute_target(uri: &Uri, headers: &HeaderMap) -> Result<Uri> {
    if uri.scheme().is_some() && uri.authority().is_some() {
        return Ok(uri.clone());
    }

    let host = match uri.authority() {
        Some(authority) => authority.as_str().to_string(),
        None => headers
            .get(HOST)
            .and_then(|value| value.to_str().ok())
            .filter(|value| !value.is_empty())
            .map(str::to_string)
            .ok_or_else(|| ProxyError::BadRequest(format!("no host for target {}", uri)))?,
    };
    let path = uri.path_and_query().map(|p| p.as_str()).unwrap_or("/");

    Uri::builder()
        .scheme("http")
        .authority(host.as_str())
        .path_and_query(path)
        .build()
        .map_err(|e| ProxyError::BadRequest(e.to_string()))
}

fn is_timeout(err: &(dyn std::error::Error + 'static)) -> bool {
    let mut source = Some(err);
    while let Some(err) = source {
        if err.is::<DeadlineExceeded>() {
            return true;
        }
        if let Some(io_err) = err.downcast_ref::<io::Error>()
            && io_err.kind() == io::ErrorKind::TimedOut
        {
            return true;
        }
        source = err.source();
    }
    false
}

fn error_response(err: &ProxyError) -> Response<ProxyBody> {
    let status = err.status();
    let mut response = Response::new(full(err.to_string()));
    *response.status_mut() = status;
    if status == StatusCode::PROXY_AUTHENTICATION_REQUIRED {
        response
            .headers_mut()
            .insert(PROXY_AUTHENTICATE, HeaderValue::from_static(BASIC_CHALLENGE));
    }
    response
}
