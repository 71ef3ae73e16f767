/*!
A small Rocket server that signs users in with OpenID Connect, shows their
claims, and demonstrates a delegated identity ("impersonation") flow: the
session's refresh token is redeemed for an access token acting as another user.

```rust,no_run
use rocket_oidc_delegation::config::SampleConfig;

#[rocket::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = SampleConfig::from_env()?;
    let rocket = rocket_oidc_delegation::setup(config).await?;
    rocket.launch().await?;
    Ok(())
}
```

Routes:

| route | guard | view |
|---|---|---|
| `GET /` | optional session | `home` |
| `GET /profile` | session | `profile` |
| `GET /impersonate?<target>` | session | `impersonate` |
| `GET /login`, `GET /authorization-code/callback`, `POST /logout` | | redirects |
| `GET /assets/<path..>` | | static files |
*/
#[macro_use]
extern crate rocket;

pub mod auth;
pub mod client;
pub mod config;
pub mod delegation;
pub mod errors;
pub mod pages;
pub mod render;
pub mod routes;
pub mod session;
pub mod token;
pub mod utils;

use client::OIDCClient;
use config::{DisplayConfig, SampleConfig};
use delegation::DelegationClient;
use errors::ServerError;
use rocket::fairing::AdHoc;
use rocket::fs::{FileServer, relative};
use rocket::{Build, Rocket};
use session::SessionStore;
use std::time::Duration;

/// How often abandoned sessions are swept from the store.
pub const SESSION_CLEANUP_PERIOD: Duration = Duration::from_secs(60);

pub struct AppState {
    pub oidc: OIDCClient,
    pub delegation: DelegationClient,
    pub sessions: SessionStore,
    pub config: SampleConfig,
    pub display: DisplayConfig,
}

impl AppState {
    /// Discovers the issuer and wires the clients that depend on it.
    pub async fn from_config(config: SampleConfig) -> Result<Self, ServerError> {
        let http = client::http_client()?;
        let oidc = OIDCClient::discover(&config, http.clone()).await?;

        let default_token_url = match (&config.delegation.token_url, oidc.token_endpoint()) {
            (Some(configured), _) => configured.clone(),
            (None, Some(discovered)) => discovered.to_string(),
            (None, None) => return Err(ServerError::MissingTokenEndpoint),
        };
        let delegation =
            DelegationClient::from_settings(http, &config.oidc, &config.delegation, &default_token_url);
        tracing::debug!(token_url = delegation.token_url(), "delegation client ready");

        Ok(Self {
            oidc,
            delegation,
            sessions: SessionStore::new(config.session_ttl()),
            display: config.display(),
            config,
        })
    }
}

/// Mounts every route, catcher and the asset directory around `state`.
pub fn build(state: AppState) -> Rocket<Build> {
    let figment = rocket::Config::figment().merge(("port", state.config.port));
    rocket::custom(figment)
        .mount("/", routes::get_routes())
        .mount("/", pages::get_routes())
        .mount("/assets", FileServer::from(relative!("assets")))
        .register("/", pages::get_catchers())
        .attach(AdHoc::on_liftoff("Session cleanup", |rocket| {
            Box::pin(async move {
                if let Some(state) = rocket.state::<AppState>() {
                    state.sessions.spawn_cleanup_task(SESSION_CLEANUP_PERIOD);
                }
            })
        }))
        .manage(state)
}

pub async fn setup(config: SampleConfig) -> Result<Rocket<Build>, ServerError> {
    let state = AppState::from_config(config).await?;
    Ok(build(state))
}
