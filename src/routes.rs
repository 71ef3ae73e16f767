//! Login, callback and logout routes for the OpenID Connect authorization code flow.
use crate::AppState;
use crate::auth::{SESSION_COOKIE, UserSession};
use crate::errors::ServerError;
use openidconnect::Nonce;
use rocket::http::{Cookie, CookieJar, SameSite};
use rocket::{Route, State, response::Redirect, routes};
use serde::{Deserialize, Serialize};

/// Cookie holding the state and nonce between `/login` and the callback.
pub const PENDING_LOGIN_COOKIE: &str = "oidc_pending_login";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PendingLogin {
    state: String,
    nonce: String,
}

#[get("/login")]
pub async fn login(jar: &CookieJar<'_>, app: &State<AppState>) -> Result<Redirect, ServerError> {
    let (authorize_url, csrf_state, nonce) = app.oidc.authorize_url();
    let pending = PendingLogin {
        state: csrf_state.secret().clone(),
        nonce: nonce.secret().clone(),
    };
    jar.add_private(
        Cookie::build((PENDING_LOGIN_COOKIE, serde_json::to_string(&pending)?))
            .http_only(true)
            .same_site(SameSite::Lax)
            .max_age(time::Duration::minutes(10)),
    );
    Ok(Redirect::to(authorize_url.to_string()))
}

#[get("/authorization-code/callback?<code>&<state>&<error>&<error_description>")]
pub async fn callback(
    jar: &CookieJar<'_>,
    app: &State<AppState>,
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
) -> Result<Redirect, ServerError> {
    let pending = jar.get_private(PENDING_LOGIN_COOKIE);
    jar.remove_private(Cookie::build(PENDING_LOGIN_COOKIE));

    if let Some(error) = error {
        let reason = match error_description {
            Some(description) => format!("{}: {}", error, description),
            None => error,
        };
        return Err(ServerError::AuthorizationDenied(reason));
    }

    let pending: PendingLogin = match pending {
        Some(cookie) => serde_json::from_str(cookie.value())?,
        None => return Err(ServerError::InvalidState),
    };
    let (Some(code), Some(state)) = (code, state) else {
        return Err(ServerError::InvalidState);
    };
    if state != pending.state {
        return Err(ServerError::InvalidState);
    }

    let context = app
        .oidc
        .exchange_code(code, &Nonce::new(pending.nonce))
        .await?;
    let id = app.sessions.create(context).await;

    let ttl = app.sessions.ttl().as_secs().min(i64::MAX as u64) as i64;
    jar.add_private(
        Cookie::build((SESSION_COOKIE, id))
            .http_only(true)
            .same_site(SameSite::Lax)
            .max_age(time::Duration::seconds(ttl)),
    );
    Ok(Redirect::to("/"))
}

#[post("/logout")]
pub async fn logout(
    jar: &CookieJar<'_>,
    app: &State<AppState>,
    session: Option<UserSession>,
) -> Redirect {
    if let Some(session) = session {
        app.sessions.destroy(session.id()).await;
        tracing::info!("user logged out");
    }
    jar.remove_private(Cookie::build(SESSION_COOKIE));
    Redirect::to("/")
}

pub fn get_routes() -> Vec<Route> {
    routes![login, callback, logout]
}
