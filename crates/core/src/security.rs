//! API-key authentication, permission scopes, and rate limiting.
//!
//! Credentials are never stored or compared in the clear: configured keys
//! are SHA-256 digested at construction, presented keys digested per
//! request, and digests compared in constant time.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use sha2::{Digest, Sha256};

use crate::error::AuthError;

/// Scope required to run detections.
pub const SCOPE_DETECT: &str = "detect";
/// Scope required for the admin read surface and cache management.
pub const SCOPE_ADMIN: &str = "admin";

const ANONYMOUS_KEY_ID: &str = "anonymous";
const KEY_ID_LEN: usize = 12;

/// A resolved caller identity. Lives for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    /// Short digest prefix identifying the key without revealing it.
    pub key_id: String,
    pub scopes: BTreeSet<String>,
}

impl Principal {
    /// Identity used when authentication is optional and no credential was
    /// presented. Holds the detect scope only.
    pub fn anonymous() -> Self {
        Self {
            key_id: ANONYMOUS_KEY_ID.to_string(),
            scopes: BTreeSet::from([SCOPE_DETECT.to_string()]),
        }
    }

    pub fn has_scope(&self, scope: &str) -> bool {
        self.scopes.contains(scope)
    }
}

/// Resolves presented credentials into principals.
pub struct AuthService {
    auth_required: bool,
    /// sha256-hex digest of a configured key -> its principal.
    keys: HashMap<String, Principal>,
}

impl AuthService {
    pub fn new(auth_required: bool, api_keys: &HashMap<String, BTreeSet<String>>) -> Self {
        let mut keys = HashMap::new();
        for (token, scopes) in api_keys {
            let digest = digest_hex(token);
            let key_id = digest[..KEY_ID_LEN].to_string();
            keys.insert(
                digest,
                Principal {
                    key_id,
                    scopes: scopes.clone(),
                },
            );
        }
        Self {
            auth_required,
            keys,
        }
    }

    pub fn auth_required(&self) -> bool {
        self.auth_required
    }

    /// Resolve a presented credential.
    ///
    /// A missing credential yields the anonymous principal when
    /// authentication is optional, `MissingCredential` otherwise. The
    /// presented key's digest is compared against every configured digest
    /// in constant time.
    pub fn authenticate(&self, token: Option<&str>) -> Result<Principal, AuthError> {
        let token = token.map(str::trim).filter(|t| !t.is_empty());
        let Some(token) = token else {
            if self.auth_required {
                return Err(AuthError::MissingCredential);
            }
            return Ok(Principal::anonymous());
        };

        let incoming = digest_hex(token);
        for (expected, principal) in &self.keys {
            if constant_time_eq(incoming.as_bytes(), expected.as_bytes()) {
                return Ok(principal.clone());
            }
        }
        Err(AuthError::InvalidCredential)
    }

    /// Verify the principal holds every required scope, reporting the
    /// sorted set of missing ones otherwise.
    pub fn ensure_scopes<'a, I>(&self, principal: &Principal, required: I) -> Result<(), AuthError>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let required: BTreeSet<String> = required
            .into_iter()
            .map(|s| s.trim().to_lowercase())
            .filter(|s| !s.is_empty())
            .collect();
        let missing: Vec<String> = required
            .into_iter()
            .filter(|scope| !principal.scopes.contains(scope))
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(AuthError::MissingScopes(missing))
        }
    }
}

fn digest_hex(token: &str) -> String {
    format!("{:x}", Sha256::digest(token.as_bytes()))
}

/// XOR-fold comparison; runtime independent of where the inputs differ.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Parse the API key configuration string.
///
/// Format: `key[:scope|scope...],key2[:...]`. Keys with no scope list get
/// the detect scope; `admin` implies `detect`. When nothing is configured
/// the fallback key is registered with both scopes so local development
/// works out of the box.
pub fn parse_api_keys(
    raw: Option<&str>,
    fallback_key: &str,
) -> HashMap<String, BTreeSet<String>> {
    let mut entries: HashMap<String, BTreeSet<String>> = HashMap::new();

    if let Some(raw) = raw {
        for chunk in raw.split(',').map(str::trim).filter(|c| !c.is_empty()) {
            let (key, scopes) = match chunk.split_once(':') {
                Some((key, scopes_raw)) => {
                    let scopes: BTreeSet<String> = scopes_raw
                        .split('|')
                        .map(|s| s.trim().to_lowercase())
                        .filter(|s| !s.is_empty())
                        .collect();
                    (key.trim(), scopes)
                }
                None => (chunk, BTreeSet::new()),
            };
            if key.is_empty() {
                continue;
            }
            let mut scopes = if scopes.is_empty() {
                BTreeSet::from([SCOPE_DETECT.to_string()])
            } else {
                scopes
            };
            if scopes.contains(SCOPE_ADMIN) {
                scopes.insert(SCOPE_DETECT.to_string());
            }
            entries.insert(key.to_string(), scopes);
        }
    }

    if entries.is_empty() && !fallback_key.is_empty() {
        entries.insert(
            fallback_key.to_string(),
            BTreeSet::from([SCOPE_DETECT.to_string(), SCOPE_ADMIN.to_string()]),
        );
    }

    entries
}

/// Outcome of one rate-limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    /// Seconds until the caller may retry; 0 when allowed.
    pub retry_after: u64,
}

/// Sliding-window rate limiter keyed by caller identity.
///
/// Each identity owns a deque of accepted-call timestamps; entries older
/// than the window are pruned before every check. Buckets are created
/// lazily and never evicted for identities that go idle — a known
/// resource-accounting caveat for long-lived processes.
pub struct SlidingWindowRateLimiter {
    limit: usize,
    window: Duration,
    buckets: Mutex<HashMap<String, VecDeque<Instant>>>,
}

impl SlidingWindowRateLimiter {
    pub fn new(limit: usize, window: Duration) -> Self {
        Self {
            limit: limit.max(1),
            window: window.max(Duration::from_secs(1)),
            buckets: Mutex::new(HashMap::new()),
        }
    }

    /// Check and record one call for `identity`.
    pub fn check(&self, identity: &str) -> RateLimitDecision {
        self.check_at(identity, Instant::now())
    }

    fn check_at(&self, identity: &str, now: Instant) -> RateLimitDecision {
        let mut buckets = self
            .buckets
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let bucket = buckets.entry(identity.to_owned()).or_default();

        while let Some(oldest) = bucket.front() {
            if now.duration_since(*oldest) >= self.window {
                bucket.pop_front();
            } else {
                break;
            }
        }

        if bucket.len() >= self.limit {
            if let Some(oldest) = bucket.front() {
                // Span until the oldest recorded call leaves the window.
                let age = now.duration_since(*oldest);
                let retry_after = self.window.saturating_sub(age).as_secs().max(1);
                return RateLimitDecision {
                    allowed: false,
                    retry_after,
                };
            }
        }

        bucket.push_back(now);
        RateLimitDecision {
            allowed: true,
            retry_after: 0,
        }
    }
}
