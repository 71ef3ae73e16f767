//! Environment driven configuration for the sample server.
//!
//! Every value is read through a lookup function so the same parsing rules apply
//! to the real process environment and to the maps used in tests.
use crate::errors::ServerError;
use crate::utils::{join_url, load_secret_file, mask_secret};
use openidconnect::url::Url;
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_SCOPE: &str = "openid profile email offline_access";
pub const DEFAULT_DELEGATION_REDIRECT_URI: &str = "https://oidcdebugger.com/debug";
pub const DEFAULT_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_SESSION_TTL_SECS: u64 = 3600;
/// Sessions never outlive a year.
pub const MAX_SESSION_TTL_SECS: u64 = 365 * 24 * 60 * 60;

/// Path the provider redirects back to after login.
pub const CALLBACK_PATH: &str = "/authorization-code/callback";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OidcSettings {
    pub issuer: String,
    pub client_id: String,
    pub client_secret: String,
    pub app_base_url: String,
    pub scope: String,
    /// Allows a plain `http` issuer, for local identity providers.
    pub testing: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DelegationSettings {
    pub init_url: String,
    /// Falls back to the token endpoint advertised by the issuer.
    pub token_url: Option<String>,
    pub redirect_uri: String,
    pub target: Option<String>,
    pub timeout_secs: u64,
}

impl DelegationSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Which compiled-in view renders `/`.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum HomePage {
    /// Greeting for users, configuration table for visitors.
    #[default]
    Home,
    /// Greeting and login link only.
    HomeMinimal,
}

impl std::str::FromStr for HomePage {
    type Err = ServerError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "" | "home" => Ok(HomePage::Home),
            "home-minimal" => Ok(HomePage::HomeMinimal),
            other => Err(ServerError::InvalidSetting {
                name: "HOME_PAGE_TEMPLATE",
                value: other.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SampleConfig {
    pub oidc: OidcSettings,
    pub delegation: DelegationSettings,
    pub port: u16,
    pub session_ttl_secs: u64,
    pub home_page: HomePage,
}

/// The configuration the views see. The client secret is masked.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct DisplayConfig {
    pub issuer: String,
    pub client_id: String,
    pub client_secret: String,
    pub app_base_url: String,
    pub scope: String,
    /// Prefills the impersonation form in the navigation bar.
    pub delegation_target: Option<String>,
    pub home_page: HomePage,
}

fn parse_flag(name: &'static str, value: &str) -> Result<bool, ServerError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(ServerError::InvalidSetting {
            name,
            value: value.to_string(),
        }),
    }
}

fn parse_number<T: std::str::FromStr>(name: &'static str, value: &str) -> Result<T, ServerError> {
    value.trim().parse().map_err(|_| ServerError::InvalidSetting {
        name,
        value: value.to_string(),
    })
}

fn check_url(name: &'static str, value: &str) -> Result<Url, ServerError> {
    Url::parse(value).map_err(|_| ServerError::InvalidSetting {
        name,
        value: value.to_string(),
    })
}

impl SampleConfig {
    pub fn from_env() -> Result<Self, ServerError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ServerError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let issuer = match lookup("ISSUER") {
            Some(issuer) => issuer,
            None => return Err(ServerError::MissingIssuerUrl),
        };
        let client_id = match lookup("CLIENT_ID") {
            Some(client_id) => client_id,
            None => return Err(ServerError::MissingClientId),
        };
        let client_secret = match (lookup("CLIENT_SECRET"), lookup("CLIENT_SECRET_FILE")) {
            (Some(secret), _) => secret,
            (None, Some(path)) => load_secret_file(path)?,
            (None, None) => return Err(ServerError::MissingClientSecret),
        };

        let port = match lookup("PORT") {
            Some(port) => parse_number("PORT", &port)?,
            None => DEFAULT_PORT,
        };
        let app_base_url = lookup("APP_BASE_URL")
            .unwrap_or_else(|| format!("http://localhost:{}", port));
        let scope = lookup("SCOPE").unwrap_or_else(|| DEFAULT_SCOPE.to_string());
        let testing = match lookup("OIDC_TESTING") {
            Some(flag) => parse_flag("OIDC_TESTING", &flag)?,
            None => false,
        };

        let init_url = match lookup("DELEGATION_INIT_URL") {
            Some(url) => url,
            None => return Err(ServerError::MissingDelegationUrl),
        };
        let timeout_secs = match lookup("DELEGATION_TIMEOUT_SECS") {
            Some(secs) => parse_number("DELEGATION_TIMEOUT_SECS", &secs)?,
            None => DEFAULT_TIMEOUT_SECS,
        };
        let session_ttl_secs = match lookup("SESSION_TTL_SECS") {
            Some(secs) => parse_number("SESSION_TTL_SECS", &secs)?,
            None => DEFAULT_SESSION_TTL_SECS,
        };
        let home_page = match lookup("HOME_PAGE_TEMPLATE") {
            Some(name) => name.parse()?,
            None => HomePage::default(),
        };

        let config = Self {
            oidc: OidcSettings {
                issuer,
                client_id,
                client_secret,
                app_base_url,
                scope,
                testing,
            },
            delegation: DelegationSettings {
                init_url,
                token_url: lookup("DELEGATION_TOKEN_URL"),
                redirect_uri: lookup("DELEGATION_REDIRECT_URI")
                    .unwrap_or_else(|| DEFAULT_DELEGATION_REDIRECT_URI.to_string()),
                target: lookup("DELEGATION_TARGET").filter(|target| !target.trim().is_empty()),
                timeout_secs,
            },
            port,
            session_ttl_secs,
            home_page,
        };
        config.validate()?;
        Ok(config)
    }

    /// Checks that every URL parses and that the issuer is served over https
    /// unless testing mode is on.
    pub fn validate(&self) -> Result<(), ServerError> {
        let issuer = check_url("ISSUER", &self.oidc.issuer)?;
        if issuer.scheme() != "https" && !self.oidc.testing {
            return Err(ServerError::InsecureIssuer(self.oidc.issuer.clone()));
        }
        check_url("APP_BASE_URL", &self.oidc.app_base_url)?;
        check_url("DELEGATION_INIT_URL", &self.delegation.init_url)?;
        if let Some(token_url) = &self.delegation.token_url {
            check_url("DELEGATION_TOKEN_URL", token_url)?;
        }
        if self.delegation.timeout_secs == 0 {
            return Err(ServerError::InvalidSetting {
                name: "DELEGATION_TIMEOUT_SECS",
                value: "0".to_string(),
            });
        }
        if self.session_ttl_secs == 0 || self.session_ttl_secs > MAX_SESSION_TTL_SECS {
            return Err(ServerError::InvalidSetting {
                name: "SESSION_TTL_SECS",
                value: self.session_ttl_secs.to_string(),
            });
        }
        Ok(())
    }

    pub fn redirect_uri(&self) -> Result<String, ServerError> {
        Ok(join_url(&self.oidc.app_base_url, CALLBACK_PATH)?)
    }

    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_secs)
    }

    pub fn display(&self) -> DisplayConfig {
        DisplayConfig {
            issuer: self.oidc.issuer.clone(),
            client_id: self.oidc.client_id.clone(),
            client_secret: mask_secret(&self.oidc.client_secret),
            app_base_url: self.oidc.app_base_url.clone(),
            scope: self.oidc.scope.clone(),
            delegation_target: self.delegation.target.clone(),
            home_page: self.home_page,
        }
    }
}
