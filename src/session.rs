//! Server-side session records for logged in users.
//!
//! The cookie only carries an opaque id; claims and tokens stay in the
//! [`SessionStore`]. Each record sits behind its own mutex so flows that swap
//! tokens are serialized per session without blocking other users.
use crate::config::MAX_SESSION_TTL_SECS;
use crate::delegation::RefreshedTokenSet;
use openidconnect::CsrfToken;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};

/// Claim name to claim value, in the order the provider sent them.
pub type Claims = serde_json::Map<String, serde_json::Value>;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TokenSet {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub id_token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserContext {
    pub userinfo: Claims,
    pub tokens: TokenSet,
}

impl UserContext {
    pub fn new(userinfo: Claims, tokens: TokenSet) -> Self {
        Self { userinfo, tokens }
    }

    /// Builds the record that replaces this one after a delegated refresh.
    ///
    /// Only the access token (and a rotated refresh token, when the provider
    /// issued one) changes; the identity of the logged in user stays the same.
    pub fn with_refreshed_tokens(&self, refreshed: &RefreshedTokenSet) -> Self {
        let refresh_token = match &refreshed.refresh_token {
            Some(rotated) => Some(rotated.clone()),
            None => self.tokens.refresh_token.clone(),
        };
        Self {
            userinfo: self.userinfo.clone(),
            tokens: TokenSet {
                access_token: refreshed.access_token.clone(),
                refresh_token,
                id_token: self.tokens.id_token.clone(),
            },
        }
    }
}

#[derive(Debug)]
struct SessionEntry {
    context: Arc<Mutex<UserContext>>,
    expires_at: Instant,
}

#[derive(Debug, Clone)]
pub struct SessionStore {
    sessions: Arc<RwLock<HashMap<String, SessionEntry>>>,
    ttl: Duration,
}

impl SessionStore {
    /// `ttl` is capped at [`MAX_SESSION_TTL_SECS`].
    pub fn new(ttl: Duration) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            ttl: ttl.min(Duration::from_secs(MAX_SESSION_TTL_SECS)),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Stores a new session and returns its id. Expired sessions are dropped
    /// on the way.
    pub async fn create(&self, context: UserContext) -> String {
        let id = CsrfToken::new_random().secret().clone();
        let now = Instant::now();
        let entry = SessionEntry {
            context: Arc::new(Mutex::new(context)),
            expires_at: now + self.ttl,
        };
        let mut sessions = self.sessions.write().await;
        sessions.retain(|_, entry| entry.expires_at > now);
        sessions.insert(id.clone(), entry);
        id
    }

    /// Removes every expired session and returns how many were dropped.
    pub async fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut sessions = self.sessions.write().await;
        let initial_len = sessions.len();
        sessions.retain(|_, entry| entry.expires_at > now);
        initial_len - sessions.len()
    }

    /// Purges expired sessions every `period` until the runtime shuts down.
    pub fn spawn_cleanup_task(&self, period: Duration) {
        let store = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                let removed = store.purge_expired().await;
                if removed > 0 {
                    tracing::debug!(removed, "purged expired sessions");
                }
            }
        });
    }

    /// Returns the lock guarding a live session, evicting it if it has expired.
    pub async fn entry(&self, id: &str) -> Option<Arc<Mutex<UserContext>>> {
        {
            let sessions = self.sessions.read().await;
            match sessions.get(id) {
                Some(entry) if entry.expires_at > Instant::now() => {
                    return Some(entry.context.clone());
                }
                Some(_) => {}
                None => return None,
            }
        }
        tracing::debug!("evicting expired session");
        self.sessions.write().await.remove(id);
        None
    }

    /// Snapshot of the session as it is right now.
    pub async fn get(&self, id: &str) -> Option<UserContext> {
        let entry = self.entry(id).await?;
        let context = entry.lock().await.clone();
        Some(context)
    }

    pub async fn destroy(&self, id: &str) -> bool {
        self.sessions.write().await.remove(id).is_some()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }
}
