//! This module provides `UserSession`, the request guard protecting pages that
//! need a logged in user.
//!
//! The guard only trusts the private (encrypted) session cookie and the server
//! side record it points to; a cookie whose session is gone is removed.

use crate::AppState;
use crate::session::UserContext;
use rocket::Request;
use rocket::http::{Cookie, Status};
use rocket::request::{FromRequest, Outcome};

pub const SESSION_COOKIE: &str = "oidc_session";

#[derive(Debug, Clone)]
pub struct UserSession {
    id: String,
    pub context: UserContext,
}

impl UserSession {
    pub fn id(&self) -> &str {
        &self.id
    }
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for UserSession {
    type Error = ();

    async fn from_request(req: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        let cookies = req.cookies();
        let Some(state) = req.rocket().state::<AppState>() else {
            tracing::error!("application state not managed");
            return Outcome::Error((Status::InternalServerError, ()));
        };

        let Some(session_cookie) = cookies.get_private(SESSION_COOKIE) else {
            tracing::debug!(uri = %req.uri(), "no session cookie found");
            return Outcome::Forward(Status::Unauthorized);
        };

        let id = session_cookie.value().to_string();
        match state.sessions.get(&id).await {
            Some(context) => Outcome::Success(UserSession { id, context }),
            None => {
                tracing::debug!("session expired or unknown");
                cookies.remove_private(Cookie::build(SESSION_COOKIE));
                Outcome::Forward(Status::Unauthorized)
            }
        }
    }
}
