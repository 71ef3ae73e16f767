//! Delegated identity ("impersonation") exchange.
//!
//! The flow is two strictly ordered calls: register the delegation with the
//! downstream API using the session's access token, then redeem the session's
//! refresh token at the token endpoint. The access token minted by the second
//! call carries the target user's attributes in its `user_context` claim.
use crate::config::{DelegationSettings, OidcSettings};
use crate::errors::DelegationError;
use crate::session::Claims;
use crate::token::{RefreshParams, extract_user_context, parse_refresh_response, perform_refresh_grant};
use reqwest::Client;
use serde_derive::Serialize;
use std::time::Duration;

/// Body of the delegation initiation request.
#[derive(Debug, Clone, Serialize)]
pub struct DelegationRequest<'a> {
    pub delegation_target: &'a str,
}

/// Tokens minted for the delegated identity.
#[derive(Debug, Clone, PartialEq)]
pub struct RefreshedTokenSet {
    pub access_token: String,
    pub id_token: Option<String>,
    /// Present only when the authorization server rotates refresh tokens.
    pub refresh_token: Option<String>,
    pub delegated_claims: Claims,
}

#[derive(Debug, Clone)]
pub struct DelegationClient {
    http: Client,
    init_url: String,
    token_url: String,
    client_id: String,
    client_secret: String,
    scope: String,
    redirect_uri: String,
    timeout: Duration,
}

impl DelegationClient {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        http: Client,
        init_url: impl Into<String>,
        token_url: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        scope: impl Into<String>,
        redirect_uri: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            http,
            init_url: init_url.into(),
            token_url: token_url.into(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            scope: scope.into(),
            redirect_uri: redirect_uri.into(),
            timeout,
        }
    }

    /// Builds the client from configuration. `default_token_url` is the token
    /// endpoint advertised by the issuer, used when no override is configured.
    pub fn from_settings(
        http: Client,
        oidc: &OidcSettings,
        delegation: &DelegationSettings,
        default_token_url: &str,
    ) -> Self {
        let token_url = delegation
            .token_url
            .clone()
            .unwrap_or_else(|| default_token_url.to_string());
        Self::new(
            http,
            delegation.init_url.clone(),
            token_url,
            oidc.client_id.clone(),
            oidc.client_secret.clone(),
            oidc.scope.clone(),
            delegation.redirect_uri.clone(),
            delegation.timeout(),
        )
    }

    pub fn token_url(&self) -> &str {
        &self.token_url
    }

    /// Exchanges the session's tokens for tokens acting as `target`.
    ///
    /// Nothing is retried and no session state is touched; persisting the new
    /// access token is up to the caller.
    pub async fn exchange_for_delegated_identity(
        &self,
        access_token: &str,
        refresh_token: &str,
        target: &str,
    ) -> Result<RefreshedTokenSet, DelegationError> {
        let init_body = self.initiate(access_token, target).await?;
        // The response content does not gate the refresh; only its arrival does.
        tracing::debug!(target_identity = target, response = %init_body, "delegation registered");

        let params = RefreshParams {
            client_id: &self.client_id,
            client_secret: &self.client_secret,
            redirect_uri: &self.redirect_uri,
            scope: &self.scope,
        };
        let body =
            perform_refresh_grant(&self.http, &self.token_url, &params, refresh_token, self.timeout)
                .await?;
        tracing::debug!("refresh response received");

        let response = parse_refresh_response(&body)?;
        if response.access_token() == access_token {
            return Err(DelegationError::MalformedTokenResponse(
                "token endpoint returned the presented access token".to_string(),
            ));
        }

        let delegated_claims = extract_user_context(response.access_token())?;
        tracing::info!(
            target_identity = target,
            expires_in = ?response.expires_in(),
            "delegated access token issued"
        );

        Ok(RefreshedTokenSet {
            access_token: response.access_token().to_string(),
            id_token: response.id_token().map(str::to_string),
            refresh_token: response.refresh_token().map(str::to_string),
            delegated_claims,
        })
    }

    async fn initiate(&self, access_token: &str, target: &str) -> Result<String, DelegationError> {
        let response = self
            .http
            .post(&self.init_url)
            .bearer_auth(access_token)
            .json(&DelegationRequest {
                delegation_target: target,
            })
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|err| DelegationError::Initiation(err.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|err| DelegationError::Initiation(err.to_string()))?;
        if !status.is_success() {
            return Err(DelegationError::Initiation(format!("{}: {}", status, body)));
        }
        Ok(body)
    }
}
