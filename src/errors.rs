use openidconnect::{ClaimsVerificationError, ConfigurationError, HttpClientError, RequestTokenError};
use rocket::Request;
use rocket::http::ContentType;
use rocket::http::Status;
use rocket::response;
use std::io::Cursor;
use thiserror::Error;

pub type TokenErr = RequestTokenError<
    HttpClientError<reqwest::Error>,
    openidconnect::StandardErrorResponse<openidconnect::core::CoreErrorResponseType>,
>;

/// Failures of the delegated token exchange, one per step of the flow.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DelegationError {
    #[error("delegation initiation failed: {0}")]
    Initiation(String),
    #[error("token refresh failed: {0}")]
    TokenRefresh(String),
    #[error("malformed token response: {0}")]
    MalformedTokenResponse(String),
    #[error("unable to extract delegated claims: {0}")]
    ClaimExtraction(String),
}

impl DelegationError {
    /// Upstream failures surface as 502, local parsing failures as 500.
    pub fn status(&self) -> Status {
        match self {
            DelegationError::Initiation(_) | DelegationError::TokenRefresh(_) => Status::BadGateway,
            DelegationError::MalformedTokenResponse(_) | DelegationError::ClaimExtraction(_) => {
                Status::InternalServerError
            }
        }
    }
}

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("IO Error: {0}")]
    IO(#[from] std::io::Error),
    #[error("serde JSON error: {0}")]
    JSONErr(#[from] serde_json::Error),
    #[error("discovery error: {0}")]
    OIDCDiscoveryErr(
        #[from] openidconnect::DiscoveryError<openidconnect::HttpClientError<reqwest::Error>>,
    ),
    #[error("reqwest error: {0}")]
    RequestErr(#[from] reqwest::Error),
    #[error("url parsing error: {0}")]
    UrlErr(#[from] openidconnect::url::ParseError),

    #[error("missing issuer url")]
    MissingIssuerUrl,
    #[error("missing client id")]
    MissingClientId,
    #[error("missing client secret")]
    MissingClientSecret,
    #[error("missing delegation initiation url")]
    MissingDelegationUrl,
    #[error("invalid value {value:?} for {name}")]
    InvalidSetting { name: &'static str, value: String },
    #[error("no token endpoint configured or advertised by the issuer")]
    MissingTokenEndpoint,
    #[error("issuer {0} must use https unless testing is enabled")]
    InsecureIssuer(String),

    #[error("openidconnect configuration error: {0}")]
    ConfigurationError(#[from] ConfigurationError),
    #[error("token validation error: {0}")]
    TokenError(#[from] TokenErr),
    #[error("id token verification error: {0}")]
    ClaimsVerification(#[from] ClaimsVerificationError),
    #[error("authorization state missing or mismatched")]
    InvalidState,
    #[error("authorization denied by provider: {0}")]
    AuthorizationDenied(String),
    #[error("provider did not return an id token")]
    MissingIdToken,

    #[error("session expired")]
    SessionExpired,
    #[error("missing refresh token")]
    MissingRefreshToken,
    #[error("no delegation target configured or requested")]
    MissingDelegationTarget,
    #[error(transparent)]
    Delegation(#[from] DelegationError),

    #[error("template rendering error: {0}")]
    Render(#[from] askama::Error),
}

impl ServerError {
    pub fn status(&self) -> Status {
        match self {
            ServerError::InvalidState | ServerError::MissingDelegationTarget => Status::BadRequest,
            ServerError::AuthorizationDenied(_)
            | ServerError::TokenError(_)
            | ServerError::ClaimsVerification(_)
            | ServerError::MissingIdToken
            | ServerError::SessionExpired => Status::Unauthorized,
            ServerError::MissingRefreshToken => Status::Conflict,
            ServerError::RequestErr(_) | ServerError::OIDCDiscoveryErr(_) => Status::BadGateway,
            ServerError::Delegation(err) => err.status(),
            _ => Status::InternalServerError,
        }
    }
}

impl<'r> response::Responder<'r, 'static> for ServerError {
    fn respond_to(self, request: &'r Request<'_>) -> response::Result<'static> {
        let status = self.status();
        tracing::error!(uri = %request.uri(), %status, error = %self, "request failed");

        let body = self.to_string();
        response::Response::build()
            .status(status)
            .header(ContentType::Plain)
            .sized_body(body.len(), Cursor::new(body))
            .ok()
    }
}
