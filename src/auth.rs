use http::header::AUTHORIZATION;
use rustc_hash::FxHashSet;

use crate::config::ClientAuthConfig;
use crate::error::ProxyError;

/// Compact key index used in hot-path authentication.
#[derive(Debug)]
pub enum AllowedClientKeys {
    /// Authentication is switched off; every request passes.
    Disabled,
    Single(Box<str>),
    Multiple(FxHashSet<String>),
}

/// Extract the client key from the `Authorization` header.
///
/// Both `Bearer <key>` and a bare `<key>` are accepted.
///
/// # Errors
///
/// Returns `ProxyError::Auth` when the header is missing or not valid ASCII.
pub fn extract_api_key(headers: &http::HeaderMap) -> Result<&str, ProxyError> {
    let value = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ProxyError::Auth("Missing API key".to_string()))?;
    Ok(value.strip_prefix("Bearer ").map_or(value, str::trim))
}

/// Authenticate an incoming request against pre-indexed `allowed_keys`.
///
/// # Errors
///
/// Returns `ProxyError::Auth` when the API key is missing or invalid.
pub fn authenticate(
    headers: &http::HeaderMap,
    allowed_keys: &AllowedClientKeys,
) -> Result<(), ProxyError> {
    let accepted = match allowed_keys {
        AllowedClientKeys::Disabled => return Ok(()),
        AllowedClientKeys::Single(key) => extract_api_key(headers)? == key.as_ref(),
        AllowedClientKeys::Multiple(set) => set.contains(extract_api_key(headers)?),
    };
    if accepted {
        Ok(())
    } else {
        Err(ProxyError::Auth("Invalid API key".to_string()))
    }
}

/// Build the key index from the client authentication section.
#[must_use]
pub fn build_allowed_key_set(auth: &ClientAuthConfig) -> AllowedClientKeys {
    if !auth.enabled {
        return AllowedClientKeys::Disabled;
    }
    let mut allowed_set: FxHashSet<String> = auth
        .allowed_keys
        .iter()
        .map(|key| key.trim())
        .filter(|key| !key.is_empty())
        .map(ToString::to_string)
        .collect();

    if allowed_set.len() == 1 {
        if let Some(single_key) = allowed_set.drain().next() {
            return AllowedClientKeys::Single(single_key.into_boxed_str());
        }
    }
    AllowedClientKeys::Multiple(allowed_set)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn auth_config(keys: &[&str]) -> ClientAuthConfig {
        ClientAuthConfig {
            enabled: true,
            allowed_keys: keys.iter().map(ToString::to_string).collect(),
        }
    }

    fn headers_with(value: &str) -> http::HeaderMap {
        let mut headers = http::HeaderMap::new();
        headers.insert("authorization", value.parse().unwrap());
        headers
    }

    #[test]
    fn test_extract_bearer_and_raw() {
        let bearer = headers_with("Bearer sk-test123");
        assert_eq!(extract_api_key(&bearer).unwrap(), "sk-test123");
        let raw = headers_with("sk-raw");
        assert_eq!(extract_api_key(&raw).unwrap(), "sk-raw");
    }

    #[test]
    fn test_extract_missing_key() {
        let err = extract_api_key(&http::HeaderMap::new()).unwrap_err();
        assert!(matches!(err, ProxyError::Auth(_)));
    }

    #[test]
    fn test_disabled_accepts_everything() {
        let index = build_allowed_key_set(&ClientAuthConfig {
            enabled: false,
            allowed_keys: vec!["ignored".into()],
        });
        assert!(matches!(index, AllowedClientKeys::Disabled));
        assert!(authenticate(&http::HeaderMap::new(), &index).is_ok());
    }

    #[test]
    fn test_single_key_index() {
        let index = build_allowed_key_set(&auth_config(&["single", "single"]));
        assert!(matches!(&index, AllowedClientKeys::Single(k) if k.as_ref() == "single"));
        assert!(authenticate(&headers_with("Bearer single"), &index).is_ok());
        assert!(authenticate(&headers_with("single"), &index).is_ok());
        let err = authenticate(&headers_with("Bearer other"), &index).unwrap_err();
        assert!(matches!(err, ProxyError::Auth(_)));
    }

    #[test]
    fn test_multiple_key_index() {
        let index = build_allowed_key_set(&auth_config(&["a", "b", "a"]));
        match &index {
            AllowedClientKeys::Multiple(set) => assert_eq!(set.len(), 2),
            other => panic!("expected multiple-key index, got {other:?}"),
        }
        assert!(authenticate(&headers_with("Bearer b"), &index).is_ok());
        assert!(authenticate(&headers_with("c"), &index).is_err());
        assert!(authenticate(&http::HeaderMap::new(), &index).is_err());
    }
}
