//! Page contexts and the askama views that render them.
use crate::config::{DisplayConfig, HomePage};
use crate::session::Claims;
use askama::Template;
use serde::Serialize;
use serde_json::Value;

/// Claim used to greet the user, in order of preference.
const GREETING_CLAIMS: [&str; 3] = ["name", "preferred_username", "email"];

/// Data handed to every view.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PageContext {
    pub is_logged_in: bool,
    pub userinfo: Option<Claims>,
    pub attributes: Option<Vec<(String, String)>>,
    pub target_attributes: Option<Vec<(String, String)>>,
}

fn claim_value(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

/// Flattens claims into `(name, value)` pairs, keeping the provider's order.
pub fn claim_attributes(claims: &Claims) -> Vec<(String, String)> {
    claims
        .iter()
        .map(|(name, value)| (name.clone(), claim_value(value)))
        .collect()
}

impl PageContext {
    /// Without a logged in user the flag is false and no claim lists are built,
    /// even if delegated claims were passed.
    pub fn build(userinfo: Option<&Claims>, delegated: Option<&Claims>) -> Self {
        match userinfo {
            Some(userinfo) => Self {
                is_logged_in: true,
                userinfo: Some(userinfo.clone()),
                attributes: Some(claim_attributes(userinfo)),
                target_attributes: delegated.map(claim_attributes),
            },
            None => Self {
                is_logged_in: false,
                userinfo: None,
                attributes: None,
                target_attributes: None,
            },
        }
    }

    pub fn greeting(&self) -> String {
        self.userinfo
            .as_ref()
            .and_then(|userinfo| {
                GREETING_CLAIMS
                    .iter()
                    .find_map(|claim| userinfo.get(*claim).and_then(Value::as_str))
            })
            .unwrap_or("")
            .to_string()
    }

    fn attributes(&self) -> Vec<(String, String)> {
        self.attributes.clone().unwrap_or_default()
    }

    fn target_attributes(&self) -> Vec<(String, String)> {
        self.target_attributes.clone().unwrap_or_default()
    }
}

#[derive(Template)]
#[template(path = "home.html")]
struct HomeView<'a> {
    is_logged_in: bool,
    greeting: String,
    default_target: &'a str,
    config: &'a DisplayConfig,
}

#[derive(Template)]
#[template(path = "home-minimal.html")]
struct MinimalHomeView<'a> {
    is_logged_in: bool,
    greeting: String,
    default_target: &'a str,
}

#[derive(Template)]
#[template(path = "profile.html")]
struct ProfileView<'a> {
    is_logged_in: bool,
    greeting: String,
    default_target: &'a str,
    attributes: Vec<(String, String)>,
}

#[derive(Template)]
#[template(path = "impersonate.html")]
struct ImpersonateView<'a> {
    is_logged_in: bool,
    greeting: String,
    default_target: &'a str,
    target: &'a str,
    attributes: Vec<(String, String)>,
    target_attributes: Vec<(String, String)>,
}

fn default_target(config: &DisplayConfig) -> &str {
    config.delegation_target.as_deref().unwrap_or("")
}

/// Renders `/` with the view selected by `config.home_page`.
pub fn render_home(page: &PageContext, config: &DisplayConfig) -> askama::Result<String> {
    match config.home_page {
        HomePage::Home => HomeView {
            is_logged_in: page.is_logged_in,
            greeting: page.greeting(),
            default_target: default_target(config),
            config,
        }
        .render(),
        HomePage::HomeMinimal => MinimalHomeView {
            is_logged_in: page.is_logged_in,
            greeting: page.greeting(),
            default_target: default_target(config),
        }
        .render(),
    }
}

pub fn render_profile(page: &PageContext, config: &DisplayConfig) -> askama::Result<String> {
    ProfileView {
        is_logged_in: page.is_logged_in,
        greeting: page.greeting(),
        default_target: default_target(config),
        attributes: page.attributes(),
    }
    .render()
}

pub fn render_impersonate(
    page: &PageContext,
    config: &DisplayConfig,
    target: &str,
) -> askama::Result<String> {
    ImpersonateView {
        is_logged_in: page.is_logged_in,
        greeting: page.greeting(),
        default_target: default_target(config),
        target,
        attributes: page.attributes(),
        target_attributes: page.target_attributes(),
    }
    .render()
}
