//! Per-browser session state and the in-memory session store.
//!
//! ARCHITECTURE
//! ============
//! A browser is identified by an opaque random cookie value. Each id maps to
//! one `Session` behind its own async mutex, so renders for the same browser
//! run one at a time while different browsers proceed concurrently.
//!
//! TRADE-OFFS
//! ==========
//! Sessions live only in process memory. A restart logs everyone out, which
//! is acceptable because nothing but the fetched profile is kept. Idle
//! sessions are swept lazily, at most once a minute, on store access instead
//! of by a background task. The store is capped; at the cap the least
//! recently seen session goes first, so anonymous traffic cannot grow it
//! without bound.

use std::collections::HashMap;
use std::fmt::Write;
use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::Rng;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

use super::auth::{AuthError, PendingFlow};
use super::google::UserProfile;

pub(crate) fn bytes_to_hex(bytes: &[u8]) -> String {
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(s, "{b:02x}");
    }
    s
}

/// Generate a cryptographically random 32-byte hex token.
#[must_use]
pub fn generate_token() -> String {
    let bytes: [u8; 32] = rand::rng().random();
    bytes_to_hex(&bytes)
}

// =============================================================================
// SESSION
// =============================================================================

/// Where a session stands in the sign-in flow. Waiting for a callback is not
/// a stored state; it is inferred from the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthState {
    LoggedOut,
    LoggedIn,
}

/// State for one browser session.
///
/// `user` and `auth_error` are never both set once a render completes.
#[derive(Debug, Clone, Default)]
pub struct Session {
    /// Signed-in Google profile.
    pub user: Option<UserProfile>,
    /// Message from the last failed sign-in, shown once on the next render.
    pub auth_error: Option<String>,
    /// Base URL the browser reached us on; drives the redirect URI.
    pub base_url: String,
    /// Login started by this session and not yet completed.
    pub pending: Option<PendingFlow>,
}

impl Session {
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self { user: None, auth_error: None, base_url: base_url.into(), pending: None }
    }

    #[must_use]
    pub fn state(&self) -> AuthState {
        if self.user.is_some() { AuthState::LoggedIn } else { AuthState::LoggedOut }
    }

    /// Replace the user wholesale and clear any earlier failure.
    pub fn sign_in(&mut self, user: UserProfile) {
        self.user = Some(user);
        self.auth_error = None;
        self.pending = None;
    }

    /// Record a failed sign-in. Any previous user is dropped.
    pub fn fail(&mut self, err: &AuthError) {
        self.user = None;
        self.auth_error = Some(format!("Authentication failed: {err}"));
        self.pending = None;
    }

    /// Forget the user and any failure. `base_url` survives.
    pub fn logout(&mut self) {
        self.user = None;
        self.auth_error = None;
        self.pending = None;
    }
}

// =============================================================================
// STORE
// =============================================================================

/// How often the idle sweep may run. Lookups check expiry themselves.
const PRUNE_INTERVAL: Duration = Duration::from_secs(60);

struct SessionSlot {
    session: Arc<Mutex<Session>>,
    last_seen: Instant,
}

#[derive(Default)]
struct Slots {
    by_id: HashMap<String, SessionSlot>,
    last_pruned: Option<Instant>,
}

/// In-memory map of session id to session. Clone is cheap; clones share state.
#[derive(Clone)]
pub struct SessionStore {
    slots: Arc<RwLock<Slots>>,
    idle: Duration,
    max: usize,
}

impl SessionStore {
    /// `max` bounds the number of live sessions; at the bound, the least
    /// recently seen session is evicted to make room.
    #[must_use]
    pub fn new(idle: Duration, max: usize) -> Self {
        Self { slots: Arc::new(RwLock::new(Slots::default())), idle, max: max.max(1) }
    }

    /// Lock the session for `id`, creating one if the id is absent, unknown
    /// or expired.
    ///
    /// Returns the id actually in use, which differs from `id` when a new
    /// session was created. The guard serializes renders for that session.
    pub async fn checkout(&self, id: Option<&str>, base_url: &str) -> (String, OwnedMutexGuard<Session>) {
        self.checkout_at(id, base_url, Instant::now()).await
    }

    pub(crate) async fn checkout_at(
        &self,
        id: Option<&str>,
        base_url: &str,
        now: Instant,
    ) -> (String, OwnedMutexGuard<Session>) {
        let idle = self.idle;
        let is_live = |slot: &SessionSlot| now.saturating_duration_since(slot.last_seen) < idle;

        let (id, session) = {
            let mut slots = self.slots.write().await;

            if slots.last_pruned.is_none_or(|at| now.saturating_duration_since(at) >= PRUNE_INTERVAL) {
                slots.by_id.retain(|_, slot| is_live(&*slot));
                slots.last_pruned = Some(now);
            }

            let known = id.filter(|id| slots.by_id.get(*id).is_some_and(&is_live));
            let id = match known {
                Some(id) => id.to_owned(),
                None => {
                    self.make_room(&mut slots.by_id);
                    let id = generate_token();
                    tracing::debug!(live = slots.by_id.len(), "new browser session");
                    id
                }
            };

            let slot = slots
                .by_id
                .entry(id.clone())
                .or_insert_with(|| SessionSlot { session: Arc::new(Mutex::new(Session::new(base_url))), last_seen: now });
            slot.last_seen = now;
            (id, Arc::clone(&slot.session))
        };

        (id, session.lock_owned().await)
    }

    /// Evict least recently seen sessions until one more fits under `max`.
    fn make_room(&self, by_id: &mut HashMap<String, SessionSlot>) {
        while by_id.len() >= self.max {
            let Some(oldest) = by_id
                .iter()
                .min_by_key(|(_, slot)| slot.last_seen)
                .map(|(id, _)| id.clone())
            else {
                return;
            };
            by_id.remove(&oldest);
            tracing::debug!(max = self.max, "evicted least recently seen session");
        }
    }
}

#[cfg(test)]
#[path = "session_test.rs"]
mod tests;
