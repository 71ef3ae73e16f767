//! Token endpoint helpers for the delegated refresh grant.
use crate::errors::DelegationError;
use crate::session::Claims;
use jsonwebtoken::{DecodingKey, Validation};
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;

/// Claim inside the delegated access token describing the impersonated user.
pub const USER_CONTEXT_CLAIM: &str = "user_context";

#[derive(Deserialize, Debug, Clone)]
pub struct RefreshResponse {
    access_token: String,
    id_token: Option<String>,
    refresh_token: Option<String>,
    expires_in: Option<u64>,
}

impl RefreshResponse {
    pub fn access_token(&self) -> &str {
        &self.access_token
    }

    pub fn id_token(&self) -> Option<&str> {
        self.id_token.as_deref()
    }

    pub fn refresh_token(&self) -> Option<&str> {
        self.refresh_token.as_deref()
    }

    /// Lifetime of the access token in seconds, when the server reports one.
    pub fn expires_in(&self) -> Option<u64> {
        self.expires_in
    }
}

/// Form body of a `refresh_token` grant.
#[derive(serde_derive::Serialize, Debug)]
struct RefreshGrant<'a> {
    grant_type: &'static str,
    redirect_uri: &'a str,
    scope: &'a str,
    refresh_token: &'a str,
}

/// Client credentials and parameters sent with every refresh grant.
#[derive(Debug, Clone)]
pub struct RefreshParams<'a> {
    pub client_id: &'a str,
    pub client_secret: &'a str,
    pub redirect_uri: &'a str,
    pub scope: &'a str,
}

///
/// # Arguments
/// token_endpoint: token endpoint of the authorization server issuing delegated tokens
/// params: client credentials plus the redirect uri and scope registered for the grant
/// refresh_token: the refresh token of the current session
/// timeout: upper bound for the whole request
///
/// Returns the raw response body so callers can report parse failures separately.
pub(crate) async fn perform_refresh_grant(
    client: &Client,
    token_endpoint: &str,
    params: &RefreshParams<'_>,
    refresh_token: &str,
    timeout: Duration,
) -> Result<String, DelegationError> {
    let form = RefreshGrant {
        grant_type: "refresh_token",
        redirect_uri: params.redirect_uri,
        scope: params.scope,
        refresh_token,
    };

    let response = client
        .post(token_endpoint)
        .basic_auth(params.client_id, Some(params.client_secret))
        .header(reqwest::header::ACCEPT, "application/json")
        .form(&form)
        .timeout(timeout)
        .send()
        .await
        .map_err(|err| DelegationError::TokenRefresh(err.to_string()))?;

    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|err| DelegationError::TokenRefresh(err.to_string()))?;
    if !status.is_success() {
        return Err(DelegationError::TokenRefresh(format!("{}: {}", status, body)));
    }
    Ok(body)
}

pub fn parse_refresh_response(body: &str) -> Result<RefreshResponse, DelegationError> {
    let response: RefreshResponse = serde_json::from_str(body)
        .map_err(|err| DelegationError::MalformedTokenResponse(err.to_string()))?;
    if response.access_token.trim().is_empty() {
        return Err(DelegationError::MalformedTokenResponse(
            "empty access_token".to_string(),
        ));
    }
    Ok(response)
}

/// Reads the payload of a JWT **without checking its signature**.
///
/// Only use this on tokens received directly from the token endpoint over TLS;
/// the transport is what vouches for the token here, not the signature.
pub fn decode_claims_unverified(token: &str) -> Result<Value, jsonwebtoken::errors::Error> {
    let mut validation = Validation::default();
    validation.insecure_disable_signature_validation();
    validation.validate_exp = false;
    validation.validate_nbf = false;
    validation.validate_aud = false;
    validation.required_spec_claims.clear();

    let data = jsonwebtoken::decode::<Value>(token, &DecodingKey::from_secret(&[]), &validation)?;
    Ok(data.claims)
}

/// Pulls the delegated identity's attributes out of an access token.
pub fn extract_user_context(access_token: &str) -> Result<Claims, DelegationError> {
    let claims = decode_claims_unverified(access_token)
        .map_err(|err| DelegationError::ClaimExtraction(err.to_string()))?;
    match claims.get(USER_CONTEXT_CLAIM) {
        Some(Value::Object(user_context)) => Ok(user_context.clone()),
        Some(other) => Err(DelegationError::ClaimExtraction(format!(
            "{} is not an object: {}",
            USER_CONTEXT_CLAIM, other
        ))),
        None => Err(DelegationError::ClaimExtraction(format!(
            "{} claim missing",
            USER_CONTEXT_CLAIM
        ))),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use jsonwebtoken::{EncodingKey, Header, encode};
    use serde_json::json;

    /// Signs `claims` with a key the decoder never sees.
    pub(crate) fn make_token(claims: Value) -> String {
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(b"authorization-server-only"),
        )
        .unwrap()
    }

    #[test]
    fn parses_refresh_response() {
        let body = r#"{"access_token":"eyJh.a.b","id_token":"eyJh.c.d","token_type":"Bearer","expires_in":3600}"#;
        let response = parse_refresh_response(body).unwrap();
        assert_eq!(response.access_token(), "eyJh.a.b");
        assert_eq!(response.id_token(), Some("eyJh.c.d"));
        assert_eq!(response.refresh_token(), None);
        assert_eq!(response.expires_in(), Some(3600));
    }

    #[test]
    fn invalid_json_is_malformed() {
        let err = parse_refresh_response("<html>bad gateway</html>").unwrap_err();
        assert!(matches!(err, DelegationError::MalformedTokenResponse(_)));
    }

    #[test]
    fn missing_access_token_is_malformed() {
        let err = parse_refresh_response(r#"{"id_token":"x"}"#).unwrap_err();
        assert!(matches!(err, DelegationError::MalformedTokenResponse(_)));

        let err = parse_refresh_response(r#"{"access_token":""}"#).unwrap_err();
        assert!(matches!(err, DelegationError::MalformedTokenResponse(_)));
    }

    #[test]
    fn decodes_without_key_or_expiry() {
        let token = make_token(json!({ "sub": "someone", "exp": 1 }));
        let claims = decode_claims_unverified(&token).unwrap();
        assert_eq!(claims["sub"], "someone");
    }

    #[test]
    fn extracts_user_context() {
        let token = make_token(json!({
            "sub": "admin@example.com",
            "user_context": { "email": "target@example.com" }
        }));
        let claims = extract_user_context(&token).unwrap();
        assert_eq!(claims.len(), 1);
        assert_eq!(claims["email"], "target@example.com");
    }

    #[test]
    fn missing_user_context_fails() {
        let token = make_token(json!({ "sub": "admin@example.com" }));
        assert!(matches!(
            extract_user_context(&token),
            Err(DelegationError::ClaimExtraction(_))
        ));

        let token = make_token(json!({ "user_context": "target@example.com" }));
        assert!(matches!(
            extract_user_context(&token),
            Err(DelegationError::ClaimExtraction(_))
        ));
    }

    #[test]
    fn opaque_token_fails() {
        assert!(matches!(
            extract_user_context("not-a-jwt"),
            Err(DelegationError::ClaimExtraction(_))
        ));
    }
}
