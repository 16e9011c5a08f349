use std::time::Duration;

use tokio::sync::Semaphore;

use crate::config::ServerConfig;
use crate::error::ProxyError;

fn build_reqwest_client(
    pool_max_idle_per_host: usize,
    pool_idle_timeout: Option<Duration>,
    timeout: Duration,
    use_env_proxy: bool,
    proxy_url: Option<&str>,
) -> Result<reqwest::Client, ProxyError> {
    let mut builder = reqwest::Client::builder()
        .pool_max_idle_per_host(pool_max_idle_per_host)
        .pool_idle_timeout(pool_idle_timeout)
        .tcp_nodelay(true)
        .connect_timeout(Duration::from_secs(5))
        .redirect(reqwest::redirect::Policy::none())
        .timeout(timeout);

    if let Some(proxy_url) = proxy_url {
        let proxy = reqwest::Proxy::all(proxy_url)
            .map_err(|err| ProxyError::Config(format!("Invalid proxy URL: {err}")))?;
        builder = builder.no_proxy().proxy(proxy);
    } else if !use_env_proxy {
        builder = builder.no_proxy();
    }

    builder
        .build()
        .map_err(|err| ProxyError::Transport(format!("Failed to build HTTP client: {err}")))
}

/// HTTP transport client for sending requests to the upstream service.
///
/// Submissions are bounded: at most `max_concurrent_upstream_requests`
/// requests may be waiting on an upstream response head at once. The permit
/// is released as soon as the head arrives, so streaming bodies never hold it.
#[derive(Debug)]
pub struct HttpTransport {
    client: reqwest::Client,
    submissions: Semaphore,
    max_submissions: usize,
}

impl HttpTransport {
    /// Create a new transport with connection pooling and timeouts from the given server config.
    ///
    /// # Errors
    ///
    /// Returns [`ProxyError::Config`] for an invalid proxy URL, or
    /// [`ProxyError::Transport`] when the client cannot be built.
    pub fn new(config: &ServerConfig, proxy_url: Option<&str>) -> Result<Self, ProxyError> {
        let pool_idle_timeout = if config.http_pool_idle_timeout_secs == 0 {
            None
        } else {
            Some(Duration::from_secs(config.http_pool_idle_timeout_secs))
        };
        let proxy_url = proxy_url.map(str::trim).filter(|value| !value.is_empty());

        let client = build_reqwest_client(
            config.http_pool_max_idle_per_host.max(1),
            pool_idle_timeout,
            Duration::from_secs(config.timeout),
            config.http_use_env_proxy,
            proxy_url,
        )?;
        let max_submissions = config.max_concurrent_upstream_requests.max(1);

        Ok(Self {
            client,
            submissions: Semaphore::new(max_submissions),
            max_submissions,
        })
    }

    /// Submission slots not currently in use.
    #[cfg(test)]
    fn available_submissions(&self) -> usize {
        self.submissions.available_permits()
    }

    #[must_use]
    pub fn max_submissions(&self) -> usize {
        self.max_submissions
    }

    /// Send a POST whose response body the caller reads as a stream.
    ///
    /// Exactly one attempt is made. Non-2xx statuses are returned as-is.
    ///
    /// # Errors
    ///
    /// Returns [`ProxyError::Transport`] when the request cannot be sent or
    /// no response head is received.
    pub async fn send_stream(
        &self,
        url: &url::Url,
        headers: &http::HeaderMap,
        body: bytes::Bytes,
    ) -> Result<reqwest::Response, ProxyError> {
        let _permit = self
            .submissions
            .acquire()
            .await
            .map_err(|_| ProxyError::Internal("upstream submission pool is closed".into()))?;

        let mut request = reqwest::Request::new(http::Method::POST, url.clone());
        *request.headers_mut() = headers.clone();
        *request.body_mut() = Some(reqwest::Body::from(body));

        self.client.execute(request).await.map_err(|err| {
            tracing::warn!(url = %url, error = %err, "upstream request failed");
            ProxyError::Transport(err.to_string())
        })
    }
}
