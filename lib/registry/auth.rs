//! Bearer-token challenge/response auth, per the distribution spec's `WWW-Authenticate` flow.

use std::collections::HashMap;

use serde::Deserialize;

use crate::model::RegistryCredentials;
use crate::{ReplicoreError, ReplicoreResult};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The `realm`, `service`, and `scope` extracted from a `WWW-Authenticate: Bearer …` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BearerChallenge {
    /// The token endpoint to request a token from.
    pub realm: String,
    /// The `service` parameter to pass to the token endpoint.
    pub service: Option<String>,
    /// The `scope` parameter to pass to the token endpoint.
    pub scope: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    token: Option<String>,
    access_token: Option<String>,
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Parses a `WWW-Authenticate` header value of the form
/// `Bearer realm="…",service="…",scope="…"`.
pub fn parse_bearer_challenge(header: &str) -> ReplicoreResult<BearerChallenge> {
    let rest = header
        .strip_prefix("Bearer ")
        .ok_or_else(|| ReplicoreError::InvalidAuthChallenge(header.to_string()))?;

    let mut params: HashMap<String, String> = HashMap::new();
    for part in split_params(rest) {
        if let Some((key, value)) = part.split_once('=') {
            params.insert(key.trim().to_string(), value.trim_matches('"').to_string());
        }
    }

    let realm = params
        .remove("realm")
        .ok_or_else(|| ReplicoreError::InvalidAuthChallenge("missing realm".to_string()))?;

    Ok(BearerChallenge {
        realm,
        service: params.remove("service"),
        scope: params.remove("scope"),
    })
}

/// Splits `key="value",key="value"` respecting quoted commas (none of the v2
/// challenge fields legally contain a comma inside their value, but this guards
/// against a registry that quotes one anyway).
fn split_params(s: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut in_quotes = false;
    let mut start = 0;
    for (i, c) in s.char_indices() {
        match c {
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => {
                parts.push(s[start..i].trim());
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(s[start..].trim());
    parts
}

/// Requests a bearer token from the challenge's realm using Basic auth (if
/// credentials were configured), and returns the token string to send as
/// `Authorization: Bearer <token>` on the retried request.
pub async fn fetch_bearer_token(
    http: &reqwest_middleware::ClientWithMiddleware,
    challenge: &BearerChallenge,
    credentials: Option<&RegistryCredentials>,
) -> ReplicoreResult<String> {
    let mut request = http.get(&challenge.realm);
    if let Some(service) = &challenge.service {
        request = request.query(&[("service", service)]);
    }
    if let Some(scope) = &challenge.scope {
        request = request.query(&[("scope", scope)]);
    }
    if let Some(creds) = credentials {
        request = request.basic_auth(&creds.username, Some(&creds.secret));
    }

    let response = request.send().await?;
    if !response.status().is_success() {
        return Err(ReplicoreError::UnexpectedStatus {
            status: response.status().as_u16(),
            operation: "fetch bearer token".to_string(),
        });
    }

    let parsed: TokenResponse = response.json().await?;
    parsed
        .token
        .or(parsed.access_token)
        .ok_or_else(|| ReplicoreError::InvalidAuthChallenge("token response had neither `token` nor `access_token`".to_string()))
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_challenge() {
        let header = r#"Bearer realm="https://auth.example.com/token",service="registry.example.com",scope="repository:library/alpine:pull""#;
        let challenge = parse_bearer_challenge(header).unwrap();
        assert_eq!(challenge.realm, "https://auth.example.com/token");
        assert_eq!(challenge.service.as_deref(), Some("registry.example.com"));
        assert_eq!(challenge.scope.as_deref(), Some("repository:library/alpine:pull"));
    }

    #[test]
    fn test_parse_missing_realm_is_error() {
        let header = r#"Bearer service="registry.example.com""#;
        assert!(parse_bearer_challenge(header).is_err());
    }

    #[test]
    fn test_parse_rejects_non_bearer_scheme() {
        assert!(parse_bearer_challenge(r#"Basic realm="x""#).is_err());
    }
}
