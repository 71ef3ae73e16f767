use crate::config::{OidcSettings, SampleConfig};
use crate::errors::ServerError;
use crate::session::{Claims, TokenSet, UserContext};
use openidconnect::core::*;
use openidconnect::reqwest;
use openidconnect::url::Url;
use openidconnect::*;
use serde_json::Value;

pub type OpenIDClient = CoreClient<
    EndpointSet,
    EndpointNotSet,
    EndpointNotSet,
    EndpointNotSet,
    EndpointMaybeSet,
    EndpointMaybeSet,
>;

/// Builds the HTTP client shared by every outbound call.
pub fn http_client() -> Result<reqwest::Client, ServerError> {
    Ok(reqwest::ClientBuilder::new()
        // Following redirects opens the client up to SSRF vulnerabilities.
        .redirect(reqwest::redirect::Policy::none())
        .build()?)
}

/// Splits the configured scope string, dropping `openid` which is always requested.
fn requested_scopes(scope: &str) -> Vec<Scope> {
    scope
        .split_whitespace()
        .filter(|scope| *scope != "openid")
        .map(|scope| Scope::new(scope.to_string()))
        .collect()
}

fn claims_to_map(value: Value) -> Claims {
    match value {
        Value::Object(map) => map,
        _ => Claims::new(),
    }
}

/// A high-level OpenID Connect client for the login flow:
/// - Discovering provider metadata
/// - Building authorization requests
/// - Exchanging authorization codes for tokens and verifying the ID token
/// - Fetching user information
#[derive(Debug, Clone)]
pub struct OIDCClient {
    // The OpenID Connect client instance, created from discovered provider metadata.
    pub client: OpenIDClient,

    // The reqwest HTTP client used for token and userinfo requests.
    http: reqwest::Client,

    userinfo_url: Option<Url>,
    token_url: Option<String>,
    scopes: Vec<Scope>,
}

impl OIDCClient {
    /// Creates a new `OIDCClient` by discovering the provider metadata of the
    /// configured issuer.
    ///
    /// # Errors
    /// Returns an error if discovery fails (including the JWKS fetch) or the
    /// redirect url cannot be built.
    pub async fn discover(config: &SampleConfig, http: reqwest::Client) -> Result<Self, ServerError> {
        let settings: &OidcSettings = &config.oidc;
        let issuer_url = IssuerUrl::new(settings.issuer.clone())?;

        let provider_metadata = CoreProviderMetadata::discover_async(issuer_url, &http).await?;
        tracing::info!(issuer = %settings.issuer, "discovered provider metadata");

        let userinfo_url = provider_metadata
            .userinfo_endpoint()
            .map(|endpoint| endpoint.url().clone());
        let token_url = provider_metadata
            .token_endpoint()
            .map(|endpoint| endpoint.url().to_string());

        let client = CoreClient::from_provider_metadata(
            provider_metadata,
            ClientId::new(settings.client_id.clone()),
            Some(ClientSecret::new(settings.client_secret.clone())),
        )
        .set_redirect_uri(RedirectUrl::new(config.redirect_uri()?)?);

        Ok(Self {
            client,
            http,
            userinfo_url,
            token_url,
            scopes: requested_scopes(&settings.scope),
        })
    }

    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    /// Token endpoint advertised by the provider, if any.
    pub fn token_endpoint(&self) -> Option<&str> {
        self.token_url.as_deref()
    }

    /// Builds the provider login url together with the state and nonce that
    /// must come back on the callback.
    pub fn authorize_url(&self) -> (Url, CsrfToken, Nonce) {
        let mut request = self.client.authorize_url(
            CoreAuthenticationFlow::AuthorizationCode,
            CsrfToken::new_random,
            Nonce::new_random,
        );
        for scope in &self.scopes {
            request = request.add_scope(scope.clone());
        }
        request.url()
    }

    /// Exchanges an authorization code, verifies the ID token against the
    /// provider keys and `nonce`, then loads the user's claims.
    pub async fn exchange_code(&self, code: String, nonce: &Nonce) -> Result<UserContext, ServerError> {
        let token_response = self
            .client
            .exchange_code(AuthorizationCode::new(code))?
            .request_async(&self.http)
            .await?;

        let id_token = token_response
            .id_token()
            .ok_or(ServerError::MissingIdToken)?;
        let id_claims = id_token.claims(&self.client.id_token_verifier(), nonce)?;
        tracing::info!(subject = %id_claims.subject().as_str(), "user authenticated");

        let access_token = token_response.access_token().secret().to_string();
        let userinfo = match &self.userinfo_url {
            Some(_) => self.user_info(&access_token).await?,
            None => claims_to_map(serde_json::to_value(id_claims)?),
        };

        Ok(UserContext::new(
            userinfo,
            TokenSet {
                access_token,
                refresh_token: token_response
                    .refresh_token()
                    .map(|token| token.secret().to_string()),
                id_token: Some(id_token.to_string()),
            },
        ))
    }

    /// Fetches the raw claims from the provider's UserInfo endpoint, keeping
    /// every claim the provider returns.
    pub async fn user_info(&self, access_token: &str) -> Result<Claims, ServerError> {
        let Some(url) = &self.userinfo_url else {
            return Ok(Claims::new());
        };
        let claims = self
            .http
            .get(url.clone())
            .bearer_auth(access_token)
            .send()
            .await?
            .error_for_status()?
            .json::<Value>()
            .await?;
        Ok(claims_to_map(claims))
    }
}
