mod request_id;

use bytes::Bytes;

use crate::api::models::build_models_response_body;
use crate::auth::{authenticate, build_allowed_key_set, AllowedClientKeys};
use crate::config::AppConfig;
use crate::error::ProxyError;
use crate::observability::token_counter::TokenCounter;
use crate::protocol::upstream::SamplingDefaults;
use crate::routing::ModelRouter;
use crate::transport::{HttpTransport, PreparedUpstream};
use crate::util::unix_now_secs;

use request_id::RequestIdGenerator;

/// Shared application state accessible to all handlers.
///
/// Everything here is built once at startup and never mutated, apart from
/// the atomic counters inside the request id generator and endpoint selector.
#[derive(Debug)]
pub struct AppState {
    pub config: AppConfig,
    pub transport: HttpTransport,
    pub model_router: ModelRouter,
    pub upstream: PreparedUpstream,
    pub token_counter: TokenCounter,
    sampling: SamplingDefaults,
    models_response_body: Bytes,
    allowed_client_keys: AllowedClientKeys,
    request_ids: RequestIdGenerator,
}

impl AppState {
    /// Assemble the state from prebuilt components.
    ///
    /// # Errors
    ///
    /// Returns [`ProxyError::Internal`] if the model list cannot be encoded.
    pub fn new(
        config: AppConfig,
        transport: HttpTransport,
        model_router: ModelRouter,
        upstream: PreparedUpstream,
        allowed_client_keys: AllowedClientKeys,
    ) -> Result<Self, ProxyError> {
        let token_counter = TokenCounter::new(config.features.token_counter);
        let sampling = SamplingDefaults {
            temperature: config.features.default_temperature,
            top_p: config.features.default_top_p,
        };
        let models_response_body = build_models_response_body(&model_router, unix_now_secs())?;
        Ok(Self {
            config,
            transport,
            model_router,
            upstream,
            token_counter,
            sampling,
            models_response_body,
            allowed_client_keys,
            request_ids: RequestIdGenerator::new(),
        })
    }

    /// Build every component from a validated configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ProxyError::Config`] when upstream credentials cannot be
    /// resolved, or [`ProxyError::Transport`] when the HTTP client cannot be built.
    pub fn from_config(config: AppConfig) -> Result<Self, ProxyError> {
        let upstream = PreparedUpstream::new(&config.upstream)?;
        let transport = HttpTransport::new(&config.server, config.upstream.proxy.as_deref())?;
        let model_router = ModelRouter::new(&config.models);
        let allowed_client_keys = build_allowed_key_set(&config.client_authentication);
        Self::new(
            config,
            transport,
            model_router,
            upstream,
            allowed_client_keys,
        )
    }

    /// Authenticate a client request using the prebuilt key index.
    ///
    /// # Errors
    ///
    /// Returns `ProxyError::Auth` when the API key is missing or invalid.
    pub fn authenticate(&self, headers: &http::HeaderMap) -> Result<(), ProxyError> {
        authenticate(headers, &self.allowed_client_keys)
    }

    #[must_use]
    pub fn next_completion_id(&self) -> String {
        self.request_ids.next_completion_id()
    }

    #[must_use]
    pub fn sampling_defaults(&self) -> SamplingDefaults {
        self.sampling
    }

    /// Pre-encoded `/v1/models` body.
    #[must_use]
    pub fn models_response_body(&self) -> Bytes {
        self.models_response_body.clone()
    }

    #[must_use]
    pub fn auth_enabled(&self) -> bool {
        !matches!(self.allowed_client_keys, AllowedClientKeys::Disabled)
    }
}
