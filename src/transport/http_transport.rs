use std::time::Duration;

use futures_util::future::BoxFuture;
use futures_util::StreamExt;

use crate::config::{ServerConfig, UpstreamConfig};
use crate::dispatch::DispatchRequest;
use crate::error::DispatchError;
use crate::intake::pipeline::{ByteStream, UpstreamTransport};

/// Longest slice of a non-2xx vendor body quoted in a fetch error.
const ERROR_BODY_EXCERPT_BYTES: usize = 512;

/// Failure to construct the outbound HTTP client at startup.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Invalid proxy URL: {0}")]
    Proxy(reqwest::Error),
    #[error("Failed to build HTTP client: {0}")]
    Build(reqwest::Error),
}

struct ClientSettings<'a> {
    pool_max_idle_per_host: usize,
    pool_idle_timeout: Option<Duration>,
    connect_timeout: Duration,
    read_timeout: Duration,
    use_env_proxy: bool,
    proxy_url: Option<&'a str>,
    user_agent: &'a str,
}

fn build_reqwest_client(settings: &ClientSettings<'_>) -> Result<reqwest::Client, TransportError> {
    // no total timeout: a generation may stream for minutes, only idle gaps are bounded
    let mut builder = reqwest::Client::builder()
        .pool_max_idle_per_host(settings.pool_max_idle_per_host)
        .pool_idle_timeout(settings.pool_idle_timeout)
        .tcp_nodelay(true)
        .connect_timeout(settings.connect_timeout)
        .read_timeout(settings.read_timeout)
        .redirect(reqwest::redirect::Policy::none())
        .user_agent(settings.user_agent);

    if let Some(proxy_url) = settings.proxy_url {
        let proxy = reqwest::Proxy::all(proxy_url).map_err(TransportError::Proxy)?;
        builder = builder.no_proxy().proxy(proxy);
    } else if !settings.use_env_proxy {
        builder = builder.no_proxy();
    }

    builder.build().map_err(TransportError::Build)
}

/// Pooled `reqwest` transport shared by every connection.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// Build the transport from server timeouts/pool settings and upstream options.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] when the proxy URL is rejected or the TLS
    /// backend cannot be initialized.
    pub fn new(server: &ServerConfig, upstream: &UpstreamConfig) -> Result<Self, TransportError> {
        let pool_idle_timeout = if server.http_pool_idle_timeout_secs == 0 {
            None
        } else {
            Some(Duration::from_secs(server.http_pool_idle_timeout_secs))
        };
        let client = build_reqwest_client(&ClientSettings {
            pool_max_idle_per_host: server.http_pool_max_idle_per_host.max(1),
            pool_idle_timeout,
            connect_timeout: Duration::from_secs(server.connect_timeout_secs),
            read_timeout: Duration::from_secs(server.read_timeout_secs),
            use_env_proxy: server.http_use_env_proxy,
            proxy_url: upstream.proxy.as_deref().map(str::trim),
            user_agent: &upstream.user_agent,
        })?;
        Ok(Self { client })
    }

    async fn send(&self, request: &DispatchRequest) -> Result<ByteStream, DispatchError> {
        let response = self
            .client
            .post(request.url())
            .headers(request.headers().clone())
            .json(request.body())
            .send()
            .await
            .map_err(|err| DispatchError::Fetch(describe_reqwest_error(&err)))?;

        let status = response.status();
        if !status.is_success() {
            // best effort: the status alone is still reported if the body fails
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(status = status.as_u16(), "upstream rejected request");
            return Err(DispatchError::Fetch(format!(
                "HTTP {status}: {}",
                excerpt(&body, ERROR_BODY_EXCERPT_BYTES)
            )));
        }

        tracing::debug!(status = status.as_u16(), "upstream stream opened");
        Ok(response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|err| DispatchError::Read(describe_reqwest_error(&err))))
            .boxed())
    }
}

impl UpstreamTransport for HttpTransport {
    fn fetch<'a>(
        &'a self,
        request: &'a DispatchRequest,
    ) -> BoxFuture<'a, Result<ByteStream, DispatchError>> {
        Box::pin(self.send(request))
    }
}

fn describe_reqwest_error(err: &reqwest::Error) -> String {
    if err.is_timeout() {
        format!("timed out ({err})")
    } else if err.is_connect() {
        format!("connection failed ({err})")
    } else {
        err.to_string()
    }
}

/// Collapse whitespace and cut `body` to at most `max_bytes` on a char boundary.
fn excerpt(body: &str, max_bytes: usize) -> String {
    let collapsed = body.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.len() <= max_bytes {
        return collapsed;
    }
    let mut end = max_bytes;
    while !collapsed.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}…", &collapsed[..end])
}
