//! Authentication cache
//!
//! Successful results are kept for the configured TTL, keyed by a keyed digest
//! of username and secret. Concurrent calls for the same credential share one
//! directory round-trip: the first caller populates the entry while the
//! others wait for its result.

use parking_lot::Mutex;
use secrecy::ExposeSecret;
use sextant_core::config::CacheSettings;
use sextant_core::{AuthenticationResult, Credential};
use sextant_crypto::{CredentialHasher, Digest256};
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::debug;

/// A stored successful result
struct Entry {
    username: String,
    result: AuthenticationResult,
    created_at: Instant,
    /// Matches the entry's position in `CacheState::order`
    seq: u64,
}

/// Listeners of one in-flight population, in attachment order
type Listeners = Vec<oneshot::Sender<AuthenticationResult>>;

#[derive(Default)]
struct CacheState {
    resolved: HashMap<Digest256, Entry>,
    /// Keyed by epoch too: a flight started before an invalidation is never
    /// joined by callers arriving after it
    pending: HashMap<(Digest256, u64), Listeners>,
    /// Resolved keys in insertion order; a slot whose `seq` no longer matches
    /// the stored entry is stale and skipped
    order: VecDeque<(Digest256, u64)>,
    /// Bumped by every invalidation; a population that started in an older
    /// epoch is delivered but not stored
    epoch: u64,
    next_seq: u64,
}

impl CacheState {
    fn is_live(&self, key: &Digest256, seq: u64) -> bool {
        self.resolved.get(key).is_some_and(|entry| entry.seq == seq)
    }
}

enum Lookup {
    Hit(AuthenticationResult),
    Wait(oneshot::Receiver<AuthenticationResult>),
    Lead(u64),
}

pub struct AuthenticationCache {
    ttl: Option<Duration>,
    max_users: usize,
    hasher: CredentialHasher,
    state: Mutex<CacheState>,
}

impl AuthenticationCache {
    pub fn new(settings: &CacheSettings) -> Self {
        Self {
            ttl: settings.ttl(),
            max_users: settings.max_users.max(1),
            hasher: CredentialHasher::new(),
            state: Mutex::new(CacheState::default()),
        }
    }

    /// Whether results are cached at all
    pub fn enabled(&self) -> bool {
        self.ttl.is_some()
    }

    /// Return the cached result for `credential`, or run `populate` once for
    /// all concurrent callers. Only successful results are stored.
    pub async fn get_or_populate<F, Fut>(&self, credential: &Credential, populate: F) -> AuthenticationResult
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = AuthenticationResult>,
    {
        let Some(ttl) = self.ttl else {
            return populate().await;
        };

        let key = self.hasher.digest(
            credential.username(),
            credential.secret().expose_secret().as_bytes(),
        );

        let epoch = loop {
            match self.lookup(&key, ttl) {
                Lookup::Hit(result) => return result,
                Lookup::Wait(rx) => match rx.await {
                    Ok(result) => return result,
                    Err(_) => debug!(
                        username = credential.username(),
                        "Pending authentication was abandoned, retrying"
                    ),
                },
                Lookup::Lead(epoch) => break epoch,
            }
        };

        let guard = PendingGuard {
            cache: self,
            key,
            epoch,
            armed: true,
        };
        let result = populate().await;
        guard.complete(credential.username(), &result);
        result
    }

    fn lookup(&self, key: &Digest256, ttl: Duration) -> Lookup {
        let mut guard = self.state.lock();
        let state = &mut *guard;

        match state.resolved.get(key) {
            Some(entry) if entry.created_at.elapsed() < ttl => {
                return Lookup::Hit(entry.result.clone());
            }
            Some(_) => {
                state.resolved.remove(key);
            }
            None => {}
        }

        let epoch = state.epoch;
        if let Some(listeners) = state.pending.get_mut(&(*key, epoch)) {
            let (tx, rx) = oneshot::channel();
            listeners.push(tx);
            return Lookup::Wait(rx);
        }

        state.pending.insert((*key, epoch), Vec::new());
        Lookup::Lead(epoch)
    }

    fn complete(&self, key: &Digest256, epoch: u64, username: &str, result: &AuthenticationResult) {
        let listeners = {
            let mut state = self.state.lock();
            let listeners = state.pending.remove(&(*key, epoch)).unwrap_or_default();

            if result.is_success() {
                if state.epoch == epoch {
                    self.store(&mut state, key, username, result);
                } else {
                    debug!(username, "Cache invalidated during authentication, result not stored");
                }
            }

            listeners
        };

        for listener in listeners {
            let _ = listener.send(result.clone());
        }
    }

    fn store(&self, state: &mut CacheState, key: &Digest256, username: &str, result: &AuthenticationResult) {
        state.resolved.remove(key);
        self.make_room(state);

        let seq = state.next_seq;
        state.next_seq += 1;
        state.resolved.insert(
            *key,
            Entry {
                username: username.to_string(),
                result: result.clone(),
                created_at: Instant::now(),
                seq,
            },
        );
        state.order.push_back((*key, seq));
    }

    /// Drop stale and expired entries from the front of the queue, then the
    /// oldest, until one more fits. Entries share one TTL, so expired entries
    /// always sit at the front.
    fn make_room(&self, state: &mut CacheState) {
        while let Some(&(key, seq)) = state.order.front() {
            let expired = match state.resolved.get(&key) {
                Some(entry) if entry.seq == seq => {
                    self.ttl.is_some_and(|ttl| entry.created_at.elapsed() >= ttl)
                }
                _ => true,
            };
            if !expired {
                break;
            }
            state.order.pop_front();
            if state.is_live(&key, seq) {
                state.resolved.remove(&key);
            }
        }

        while state.resolved.len() >= self.max_users {
            let Some((key, seq)) = state.order.pop_front() else {
                break;
            };
            if state.is_live(&key, seq) {
                state.resolved.remove(&key);
            }
        }
    }

    /// Drop every stored result. Populations already in flight still reach
    /// their callers but are not stored, and later callers start afresh.
    pub fn invalidate_all(&self) {
        let mut state = self.state.lock();
        state.resolved.clear();
        state.order.clear();
        state.epoch += 1;
        debug!(epoch = state.epoch, "Invalidated authentication cache");
    }

    /// Drop every stored result for `username`, whatever the secret
    pub fn expire(&self, username: &str) {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        state.resolved.retain(|_, entry| entry.username != username);
        let resolved = &state.resolved;
        state
            .order
            .retain(|(key, seq)| resolved.get(key).is_some_and(|entry| entry.seq == *seq));
    }

    /// Number of stored results
    pub fn len(&self) -> usize {
        self.state.lock().resolved.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Removes the pending flight if the populating future is dropped early, which
/// wakes its listeners so one of them can take over.
struct PendingGuard<'a> {
    cache: &'a AuthenticationCache,
    key: Digest256,
    epoch: u64,
    armed: bool,
}

impl PendingGuard<'_> {
    fn complete(mut self, username: &str, result: &AuthenticationResult) {
        self.armed = false;
        self.cache.complete(&self.key, self.epoch, username, result);
    }
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }

        self.cache.state.lock().pending.remove(&(self.key, self.epoch));
    }
}
