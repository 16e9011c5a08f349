use crate::config::{UpstreamConfig, UpstreamCredentials};
use crate::error::ProxyError;

use super::endpoint::{selector_for, EndpointSelector};

/// Precomputed upstream metadata used by hot request paths.
///
/// Built once at startup; credentials are never re-read per request.
#[derive(Debug)]
pub struct PreparedUpstream {
    endpoints: Vec<url::Url>,
    selector: Box<dyn EndpointSelector>,
    static_headers: http::HeaderMap,
    expected_content_type: Option<String>,
}

impl PreparedUpstream {
    /// Resolve credentials (reading files where configured) and prepare the upstream.
    ///
    /// # Errors
    ///
    /// Returns [`ProxyError::Config`] when credentials cannot be resolved, an
    /// endpoint does not parse, or a header value is not valid.
    pub fn new(upstream: &UpstreamConfig) -> Result<Self, ProxyError> {
        let credentials = upstream
            .resolve_credentials()
            .map_err(|e| ProxyError::Config(e.to_string()))?;
        Self::with_credentials(upstream, &credentials)
    }

    /// Prepare the upstream from already-resolved credentials.
    ///
    /// # Errors
    ///
    /// Returns [`ProxyError::Config`] when an endpoint does not parse or a
    /// header value is not valid.
    pub fn with_credentials(
        upstream: &UpstreamConfig,
        credentials: &UpstreamCredentials,
    ) -> Result<Self, ProxyError> {
        let endpoints = upstream
            .endpoints
            .iter()
            .map(|endpoint| {
                url::Url::parse(endpoint).map_err(|e| {
                    ProxyError::Config(format!("invalid upstream endpoint '{endpoint}': {e}"))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        if endpoints.is_empty() {
            return Err(ProxyError::Config(
                "at least one upstream endpoint is required".into(),
            ));
        }

        Ok(Self {
            endpoints,
            selector: selector_for(upstream.endpoint_selection),
            static_headers: Self::build_upstream_headers(upstream, credentials)?,
            expected_content_type: normalize_content_type(
                upstream.expected_content_type.as_deref(),
            ),
        })
    }

    fn build_upstream_headers(
        upstream: &UpstreamConfig,
        credentials: &UpstreamCredentials,
    ) -> Result<http::HeaderMap, ProxyError> {
        fn header_value(name: &str, value: &str) -> Result<http::HeaderValue, ProxyError> {
            http::HeaderValue::from_str(value)
                .map_err(|e| ProxyError::Config(format!("invalid value for header '{name}': {e}")))
        }

        let mut headers = http::HeaderMap::new();
        headers.insert(
            http::header::ACCEPT,
            http::HeaderValue::from_static("text/event-stream"),
        );
        headers.insert(
            http::header::ACCEPT_LANGUAGE,
            header_value("accept-language", &upstream.accept_language)?,
        );
        headers.insert(
            http::header::CONTENT_TYPE,
            http::HeaderValue::from_static("application/json"),
        );
        headers.insert(
            "next-action",
            header_value("next-action", &credentials.next_action)?,
        );
        headers.insert(
            http::header::USER_AGENT,
            header_value("user-agent", &upstream.user_agent)?,
        );
        if let Some(cookie) = credentials.cookie.as_deref() {
            headers.insert(http::header::COOKIE, header_value("cookie", cookie)?);
        }
        Ok(headers)
    }

    /// Pick the endpoint for the next request.
    #[must_use]
    pub fn next_endpoint(&self) -> &url::Url {
        &self.endpoints[self.selector.select(self.endpoints.len())]
    }

    #[must_use]
    pub fn endpoints(&self) -> &[url::Url] {
        &self.endpoints
    }

    #[must_use]
    pub fn selection_name(&self) -> &'static str {
        self.selector.name()
    }

    #[must_use]
    pub(crate) fn static_headers(&self) -> &http::HeaderMap {
        &self.static_headers
    }

    /// Lowercased media type the upstream must answer with, if enforced.
    #[must_use]
    pub fn expected_content_type(&self) -> Option<&str> {
        self.expected_content_type.as_deref()
    }

    /// Check a response `content-type` against the expected media type.
    ///
    /// Parameters such as `charset` are ignored.
    #[must_use]
    pub fn content_type_matches(&self, content_type: Option<&http::HeaderValue>) -> bool {
        let Some(expected) = self.expected_content_type.as_deref() else {
            return true;
        };
        content_type
            .and_then(|value| value.to_str().ok())
            .and_then(|value| normalize_content_type(Some(value)))
            .is_some_and(|actual| actual == expected)
    }
}

fn normalize_content_type(value: Option<&str>) -> Option<String> {
    value.and_then(|raw| {
        let media_type = raw.split(';').next().unwrap_or_default().trim();
        (!media_type.is_empty()).then(|| media_type.to_ascii_lowercase())
    })
}
