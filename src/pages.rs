//! Server rendered pages: home, profile and the impersonation flow.
use crate::AppState;
use crate::auth::UserSession;
use crate::errors::ServerError;
use crate::render::{self, PageContext};
use rocket::response::{Redirect, content::RawHtml};
use rocket::{Catcher, Route, State, catchers, routes};

#[get("/")]
pub async fn home(
    app: &State<AppState>,
    session: Option<UserSession>,
) -> Result<RawHtml<String>, ServerError> {
    let userinfo = session.as_ref().map(|session| &session.context.userinfo);
    let page = PageContext::build(userinfo, None);
    Ok(RawHtml(render::render_home(&page, &app.display)?))
}

#[get("/profile")]
pub async fn profile(
    app: &State<AppState>,
    session: UserSession,
) -> Result<RawHtml<String>, ServerError> {
    let page = PageContext::build(Some(&session.context.userinfo), None);
    Ok(RawHtml(render::render_profile(&page, &app.display)?))
}

/// Swaps the session's access token for one acting as `target` (or the
/// configured default target) and shows both identities.
///
/// The exchange runs under the session's lock, so the refresh token is read
/// and replaced by one request at a time, and the stored tokens only change
/// once the whole exchange succeeded.
#[get("/impersonate?<target>")]
pub async fn impersonate(
    app: &State<AppState>,
    session: UserSession,
    target: Option<String>,
) -> Result<RawHtml<String>, ServerError> {
    let target = target
        .filter(|target| !target.trim().is_empty())
        .or_else(|| app.config.delegation.target.clone())
        .ok_or(ServerError::MissingDelegationTarget)?;

    let entry = app
        .sessions
        .entry(session.id())
        .await
        .ok_or(ServerError::SessionExpired)?;
    let mut current = entry.lock().await;
    let refresh_token = current
        .tokens
        .refresh_token
        .clone()
        .ok_or(ServerError::MissingRefreshToken)?;

    let refreshed = app
        .delegation
        .exchange_for_delegated_identity(&current.tokens.access_token, &refresh_token, &target)
        .await?;
    *current = current.with_refreshed_tokens(&refreshed);

    let page = PageContext::build(Some(&current.userinfo), Some(&refreshed.delegated_claims));
    drop(current);
    Ok(RawHtml(render::render_impersonate(&page, &app.display, &target)?))
}

#[catch(401)]
pub fn unauthorized() -> Redirect {
    Redirect::to("/login")
}

pub fn get_routes() -> Vec<Route> {
    routes![home, profile, impersonate]
}

pub fn get_catchers() -> Vec<Catcher> {
    catchers![unauthorized]
}

#[cfg(test)]
mod tests {
    use crate::auth::SESSION_COOKIE;
    use crate::session::{Claims, TokenSet, UserContext};
    use crate::test_support::{mock_provider, test_client};
    use crate::token::tests::make_token;
    use crate::AppState;
    use rocket::http::{Cookie, Status};
    use serde_json::json;
    use std::time::Duration;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn alice() -> UserContext {
        let mut userinfo = Claims::new();
        userinfo.insert("name".into(), json!("Alice"));
        userinfo.insert("email".into(), json!("alice@example.com"));
        UserContext::new(
            userinfo,
            TokenSet {
                access_token: "alice-access".to_string(),
                refresh_token: Some("alice-refresh".to_string()),
                id_token: None,
            },
        )
    }

    async fn login(client: &rocket::local::asynchronous::Client, context: UserContext) -> String {
        let state = client.rocket().state::<AppState>().unwrap();
        state.sessions.create(context).await
    }

    #[rocket::async_test]
    async fn home_for_anonymous_visitor() {
        let provider = mock_provider().await;
        let client = test_client(&provider, &provider).await;

        let response = client.get("/").dispatch().await;
        assert_eq!(response.status(), Status::Ok);
        let body = response.into_string().await.unwrap();
        assert!(body.contains("/login"));
        assert!(body.contains("****cret"));
    }

    #[rocket::async_test]
    async fn home_greets_logged_in_user() {
        let provider = mock_provider().await;
        let client = test_client(&provider, &provider).await;
        let id = login(&client, alice()).await;

        let response = client
            .get("/")
            .private_cookie(Cookie::new(SESSION_COOKIE, id))
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Ok);
        assert!(response.into_string().await.unwrap().contains("Welcome back, Alice"));
    }

    #[rocket::async_test]
    async fn profile_requires_login() {
        let provider = mock_provider().await;
        let client = test_client(&provider, &provider).await;

        let response = client.get("/profile").dispatch().await;
        assert_eq!(response.status(), Status::SeeOther);
        assert_eq!(response.headers().get_one("Location"), Some("/login"));

        let response = client
            .get("/profile")
            .private_cookie(Cookie::new(SESSION_COOKIE, "unknown-session"))
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::SeeOther);
    }

    #[rocket::async_test]
    async fn profile_lists_claims() {
        let provider = mock_provider().await;
        let client = test_client(&provider, &provider).await;
        let id = login(&client, alice()).await;

        let response = client
            .get("/profile")
            .private_cookie(Cookie::new(SESSION_COOKIE, id))
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Ok);
        let body = response.into_string().await.unwrap();
        assert!(body.contains("<td>name</td><td>Alice</td>"));
        assert!(body.contains("<td>email</td><td>alice@example.com</td>"));
    }

    #[rocket::async_test]
    async fn impersonate_requires_login() {
        let provider = mock_provider().await;
        let client = test_client(&provider, &provider).await;

        let response = client.get("/impersonate").dispatch().await;
        assert_eq!(response.status(), Status::SeeOther);
        assert_eq!(response.headers().get_one("Location"), Some("/login"));
    }

    #[rocket::async_test]
    async fn impersonate_updates_session_access_token() {
        let provider = mock_provider().await;
        let api = MockServer::start().await;
        let delegated = make_token(json!({
            "sub": "alice@example.com",
            "user_context": { "name": "Bob", "email": "bob@example.com" }
        }));
        Mock::given(method("POST"))
            .and(path("/delegate/init"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&api)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": delegated,
                "id_token": "bob-id",
            })))
            .expect(1)
            .mount(&api)
            .await;

        let client = test_client(&provider, &api).await;
        let id = login(&client, alice()).await;

        let response = client
            .get("/impersonate?target=bob@example.com")
            .private_cookie(Cookie::new(SESSION_COOKIE, id.clone()))
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Ok);
        let body = response.into_string().await.unwrap();
        assert!(body.contains("<td>name</td><td>Alice</td>"));
        assert!(body.contains("<td>name</td><td>Bob</td>"));

        let state = client.rocket().state::<AppState>().unwrap();
        let stored = state.sessions.get(&id).await.unwrap();
        assert_eq!(stored.tokens.access_token, delegated);
        assert_eq!(stored.tokens.refresh_token.as_deref(), Some("alice-refresh"));
        assert_eq!(stored.userinfo, alice().userinfo);
    }

    #[rocket::async_test]
    async fn concurrent_impersonations_of_one_session_run_in_turn() {
        let provider = mock_provider().await;
        let api = MockServer::start().await;
        let first = make_token(json!({ "user_context": { "name": "Bob" } }));
        let second = make_token(json!({ "user_context": { "name": "Carol" } }));

        // The second initiation must present the token minted by the first exchange.
        Mock::given(method("POST"))
            .and(path("/delegate/init"))
            .and(header("authorization", "Bearer alice-access"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&api)
            .await;
        Mock::given(method("POST"))
            .and(path("/delegate/init"))
            .and(header("authorization", format!("Bearer {}", first).as_str()))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&api)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1/token"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "access_token": first }))
                    .set_delay(Duration::from_millis(200)),
            )
            .up_to_n_times(1)
            .with_priority(1)
            .expect(1)
            .mount(&api)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1/token"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "access_token": second }))
                    .set_delay(Duration::from_millis(200)),
            )
            .with_priority(2)
            .expect(1)
            .mount(&api)
            .await;

        let client = test_client(&provider, &api).await;
        let id = login(&client, alice()).await;

        let one = client
            .get("/impersonate?target=bob@example.com")
            .private_cookie(Cookie::new(SESSION_COOKIE, id.clone()))
            .dispatch();
        let two = client
            .get("/impersonate?target=bob@example.com")
            .private_cookie(Cookie::new(SESSION_COOKIE, id.clone()))
            .dispatch();
        let (one, two) = tokio::join!(one, two);
        assert_eq!(one.status(), Status::Ok);
        assert_eq!(two.status(), Status::Ok);

        let state = client.rocket().state::<AppState>().unwrap();
        let stored = state.sessions.get(&id).await.unwrap();
        assert_eq!(stored.tokens.access_token, second);
    }

    #[rocket::async_test]
    async fn failed_impersonation_keeps_original_token() {
        let provider = mock_provider().await;
        let api = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/delegate/init"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&api)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1/token"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&api)
            .await;

        let client = test_client(&provider, &api).await;
        let id = login(&client, alice()).await;

        let response = client
            .get("/impersonate?target=bob@example.com")
            .private_cookie(Cookie::new(SESSION_COOKIE, id.clone()))
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::InternalServerError);

        let state = client.rocket().state::<AppState>().unwrap();
        let stored = state.sessions.get(&id).await.unwrap();
        assert_eq!(stored.tokens.access_token, "alice-access");
    }

    #[rocket::async_test]
    async fn upstream_failure_is_bad_gateway() {
        let provider = mock_provider().await;
        let api = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/delegate/init"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&api)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1/token"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&api)
            .await;

        let client = test_client(&provider, &api).await;
        let id = login(&client, alice()).await;

        let response = client
            .get("/impersonate?target=bob@example.com")
            .private_cookie(Cookie::new(SESSION_COOKIE, id))
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::BadGateway);
    }

    #[rocket::async_test]
    async fn impersonation_without_refresh_token_conflicts() {
        let provider = mock_provider().await;
        let client = test_client(&provider, &provider).await;
        let mut context = alice();
        context.tokens.refresh_token = None;
        let id = login(&client, context).await;

        let response = client
            .get("/impersonate?target=bob@example.com")
            .private_cookie(Cookie::new(SESSION_COOKIE, id))
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Conflict);
    }

    #[rocket::async_test]
    async fn impersonation_without_target_is_rejected() {
        let provider = mock_provider().await;
        let client = test_client(&provider, &provider).await;
        let id = login(&client, alice()).await;

        let response = client
            .get("/impersonate")
            .private_cookie(Cookie::new(SESSION_COOKIE, id))
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::BadRequest);
    }
}
