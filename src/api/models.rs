use std::sync::Arc;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::Response;
use serde::Serialize;

use crate::error::{into_axum_response, ProxyError};
use crate::routing::ModelRouter;
use crate::state::AppState;

use super::common::ok_json_response;

#[derive(Debug, Serialize)]
struct ModelList<'a> {
    object: &'static str,
    data: Vec<ModelCard<'a>>,
}

#[derive(Debug, Serialize)]
struct ModelCard<'a> {
    id: &'a str,
    object: &'static str,
    created: u64,
    owned_by: &'a str,
}

/// Render the catalog as an `OpenAI` model list.
///
/// # Errors
///
/// Returns [`ProxyError::Internal`] if serialization fails.
pub(crate) fn build_models_response_body(
    router: &ModelRouter,
    created: u64,
) -> Result<bytes::Bytes, ProxyError> {
    let list = ModelList {
        object: "list",
        data: router
            .models()
            .iter()
            .map(|model| ModelCard {
                id: &model.name,
                object: "model",
                created,
                owned_by: &model.provider,
            })
            .collect(),
    };
    serde_json::to_vec(&list)
        .map(bytes::Bytes::from)
        .map_err(|e| ProxyError::Internal(format!("failed to encode model list: {e}")))
}

/// `GET /v1/models`: the configured catalog in `OpenAI` format.
#[must_use]
pub fn handler(State(state): State<Arc<AppState>>, headers: &HeaderMap) -> Response {
    if let Err(err) = state.authenticate(headers) {
        return into_axum_response(&err);
    }
    ok_json_response(state.models_response_body())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::default_models;

    #[test]
    fn test_models_body_shape() {
        let router = ModelRouter::new(&default_models());
        let body = build_models_response_body(&router, 1_700_000_000).unwrap();
        let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body["object"], "list");
        let data = body["data"].as_array().unwrap();
        assert_eq!(data.len(), 11);

        let sonnet = data
            .iter()
            .find(|m| m["id"] == "claude-3-5-sonnet-20240620")
            .unwrap();
        assert_eq!(sonnet["object"], "model");
        assert_eq!(sonnet["created"], 1_700_000_000);
        assert_eq!(sonnet["owned_by"], "anthropic");
    }
}
