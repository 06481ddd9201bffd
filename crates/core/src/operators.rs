use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use teamserver_shared::{EventData, TeamserverError, TeamserverResult};

use crate::config::OperatorCredential;
use crate::events::{EventBus, Subscription};

/// How a profile password is checked.
#[derive(Debug, Clone)]
enum Secret {
    Plain(String),
    Argon2(String),
}

impl Secret {
    fn from_profile(password: &str) -> Self {
        if password.starts_with("$argon2") {
            Secret::Argon2(password.to_string())
        } else {
            Secret::Plain(password.to_string())
        }
    }

    fn verify(&self, candidate: &str) -> bool {
        match self {
            Secret::Plain(expected) => {
                use subtle::ConstantTimeEq;
                candidate.as_bytes().ct_eq(expected.as_bytes()).into()
            }
            Secret::Argon2(hash) => verify_password(candidate, hash).unwrap_or_else(|e| {
                warn!(error = %e, "⚠️ Unreadable operator password hash");
                false
            }),
        }
    }
}

/// Hash a plaintext password using Argon2id.
pub fn hash_password(password: &str) -> anyhow::Result<String> {
    use argon2::password_hash::SaltString;
    use argon2::{Argon2, PasswordHasher};
    use rand::rngs::OsRng;

    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("Password hashing failed: {}", e))?;
    Ok(hash.to_string())
}

/// Verify a plaintext password against a stored Argon2id hash.
pub fn verify_password(password: &str, hash: &str) -> anyhow::Result<bool> {
    use argon2::password_hash::PasswordHash;
    use argon2::{Argon2, PasswordVerifier};

    let parsed_hash =
        PasswordHash::new(hash).map_err(|e| anyhow::anyhow!("Invalid password hash: {}", e))?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok())
}

/// 32 lowercase hex characters.
fn new_token() -> String {
    let bytes: [u8; 16] = rand::random();
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

#[derive(Debug, Clone)]
struct TokenEntry {
    username: String,
    issued: Instant,
    /// Bus subscription id once the event stream is up.
    subscription: Option<u64>,
}

impl TokenEntry {
    fn expired(&self, ttl: Duration) -> bool {
        self.subscription.is_none() && self.issued.elapsed() >= ttl
    }
}

/// A connected operator: its token and its event feed.
pub struct OperatorConnection {
    pub username: String,
    pub token: String,
    pub events: Subscription,
}

/// Tracks operators from login through the event-stream handshake to
/// disconnect. At most one connected session per username.
///
/// A token that never completes the handshake lapses after `pending_ttl`.
pub struct OperatorSessions {
    credentials: HashMap<String, Secret>,
    tokens: DashMap<String, TokenEntry>,
    online: DashMap<String, String>,
    events: Arc<EventBus>,
    pending_ttl: Duration,
}

impl OperatorSessions {
    pub fn new(
        operators: &[OperatorCredential],
        events: Arc<EventBus>,
        pending_ttl: Duration,
    ) -> Self {
        let credentials = operators
            .iter()
            .map(|op| (op.username.clone(), Secret::from_profile(&op.password)))
            .collect();
        Self {
            credentials,
            tokens: DashMap::new(),
            online: DashMap::new(),
            events,
            pending_ttl,
        }
    }

    /// Forgets pending tokens older than the TTL.
    pub fn sweep_pending(&self) -> usize {
        let before = self.tokens.len();
        self.tokens.retain(|_, entry| !entry.expired(self.pending_ttl));
        let swept = before.saturating_sub(self.tokens.len());
        if swept > 0 {
            debug!(swept, "Expired pending operator tokens");
        }
        swept
    }

    /// Tokens issued but not yet connected.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.tokens
            .iter()
            .filter(|e| e.subscription.is_none())
            .count()
    }

    /// A live token: connected, or pending within the TTL.
    fn live(&self, token: &str) -> Option<TokenEntry> {
        let entry = self.tokens.get(token)?.clone();
        if entry.expired(self.pending_ttl) {
            self.tokens
                .remove_if(token, |_, e| e.expired(self.pending_ttl));
            return None;
        }
        Some(entry)
    }

    /// Checks credentials and issues a pending token.
    pub fn login(&self, username: &str, password: &str) -> TeamserverResult<String> {
        let valid = self
            .credentials
            .get(username)
            .map(|secret| secret.verify(password))
            .unwrap_or(false);
        if !valid {
            warn!(operator = %username, "🚫 Rejected operator login");
            return Err(TeamserverError::Unauthorized("invalid credentials".into()));
        }
        if self.online.contains_key(username) {
            return Err(TeamserverError::AlreadyExists(format!(
                "operator {} is already connected",
                username
            )));
        }

        self.sweep_pending();
        let token = new_token();
        self.tokens.insert(
            token.clone(),
            TokenEntry {
                username: username.to_string(),
                issued: Instant::now(),
                subscription: None,
            },
        );
        info!(operator = %username, "🔑 Operator logged in");
        Ok(token)
    }

    /// Completes the handshake for a pending token: replays durable events,
    /// subscribes to new ones and announces the operator.
    pub fn connect(&self, token: &str) -> TeamserverResult<OperatorConnection> {
        let username = match self.live(token) {
            Some(entry) if entry.subscription.is_none() => entry.username,
            _ => return Err(TeamserverError::Unauthorized("invalid token".into())),
        };

        match self.online.entry(username.clone()) {
            Entry::Occupied(_) => {
                return Err(TeamserverError::AlreadyExists(format!(
                    "operator {} is already connected",
                    username
                )))
            }
            Entry::Vacant(slot) => {
                slot.insert(token.to_string());
            }
        }

        let events = self.events.subscribe(&username);
        match self.tokens.get_mut(token) {
            Some(mut entry) if entry.subscription.is_none() => entry.subscription = Some(events.id),
            _ => {
                // logged out while the handshake was in flight
                self.events.unsubscribe_if(&username, events.id);
                self.online.remove_if(&username, |_, owner| owner.as_str() == token);
                return Err(TeamserverError::Unauthorized("invalid token".into()));
            }
        }
        info!(operator = %username, "🟢 Operator connected");
        self.events.emit(EventData::UserLogin {
            username: username.clone(),
        });

        Ok(OperatorConnection {
            username,
            token: token.to_string(),
            events,
        })
    }

    /// Username behind a bearer token.
    pub fn authorize(&self, token: &str) -> TeamserverResult<String> {
        self.live(token)
            .map(|entry| entry.username)
            .ok_or_else(|| TeamserverError::Unauthorized("invalid token".into()))
    }

    /// Drops the session behind `token`. Returns whether the token existed.
    pub fn disconnect(&self, token: &str) -> bool {
        let Some((_, entry)) = self.tokens.remove(token) else {
            return false;
        };

        if let Some(id) = entry.subscription {
            // a newer session under the same name keeps its queue
            self.events.unsubscribe_if(&entry.username, id);
            self.online
                .remove_if(&entry.username, |_, owner| owner.as_str() == token);
            info!(operator = %entry.username, "🔴 Operator disconnected");
            self.events.emit(EventData::UserLogout {
                username: entry.username,
            });
        }
        true
    }

    pub fn logout(&self, token: &str) -> TeamserverResult<()> {
        if self.disconnect(token) {
            Ok(())
        } else {
            Err(TeamserverError::Unauthorized("invalid token".into()))
        }
    }

    /// Connected usernames, sorted.
    #[must_use]
    pub fn online(&self) -> Vec<String> {
        let mut names: Vec<String> = self.online.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }
}
