//! # Identity Resolution
//!
//! Maps an opaque bearer credential to a user identity plus a client scoped
//! to that user. Credentials are never held in the clear once configured:
//! lookups compare SHA-256 digests in constant time.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use super::errors::{SessionError, SessionResult};
use crate::sync::UserId;

/// SHA-256 digest of a credential
pub type CredentialDigest = [u8; 32];

/// Hash a credential for lookup and cache keys
pub fn credential_digest(credential: &str) -> CredentialDigest {
    let mut hasher = Sha256::new();
    hasher.update(credential.as_bytes());
    hasher.finalize().into()
}

/// Who is behind a credential
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserIdentity {
    pub user_id: UserId,
    pub shortname: String,
    pub display_name: String,
}

/// A per-user client handle that must be released when its session ends
pub trait ScopedClient: Send + Sync {
    fn release(&self);
}

/// Identity plus its scoped client
#[derive(Clone)]
pub struct ResolvedSession {
    pub identity: UserIdentity,
    pub client: Arc<dyn ScopedClient>,
}

impl std::fmt::Debug for ResolvedSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedSession")
            .field("identity", &self.identity)
            .finish_non_exhaustive()
    }
}

/// Resolves credentials against the identity backend
pub trait IdentityResolver: Send + Sync {
    fn resolve<'a>(&'a self, credential: &'a str) -> BoxFuture<'a, SessionResult<ResolvedSession>>;
}

/// Configured credential entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaticIdentity {
    pub token: String,
    pub user_id: UserId,
    pub shortname: String,
    pub display_name: String,
}

struct CountingClient {
    released: Arc<AtomicUsize>,
}

impl ScopedClient for CountingClient {
    fn release(&self) {
        self.released.fetch_add(1, Ordering::SeqCst);
    }
}

/// Fixed credential table loaded from configuration
pub struct StaticIdentityResolver {
    entries: Vec<(CredentialDigest, UserIdentity)>,
    resolutions: AtomicUsize,
    released: Arc<AtomicUsize>,
}

impl StaticIdentityResolver {
    pub fn new(identities: &[StaticIdentity]) -> Self {
        let entries = identities
            .iter()
            .map(|id| {
                (
                    credential_digest(&id.token),
                    UserIdentity {
                        user_id: id.user_id,
                        shortname: id.shortname.clone(),
                        display_name: id.display_name.clone(),
                    },
                )
            })
            .collect();
        Self {
            entries,
            resolutions: AtomicUsize::new(0),
            released: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Successful resolutions so far
    pub fn resolutions(&self) -> usize {
        self.resolutions.load(Ordering::SeqCst)
    }

    /// Clients released so far
    pub fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }

    fn lookup(&self, credential: &str) -> Option<&UserIdentity> {
        let digest = credential_digest(credential);
        // Scan every entry so timing does not depend on which one matches.
        let mut found = None;
        for (candidate, identity) in &self.entries {
            if bool::from(candidate[..].ct_eq(&digest[..])) {
                found = Some(identity);
            }
        }
        found
    }
}

impl IdentityResolver for StaticIdentityResolver {
    fn resolve<'a>(&'a self, credential: &'a str) -> BoxFuture<'a, SessionResult<ResolvedSession>> {
        Box::pin(async move {
            let identity = self
                .lookup(credential)
                .cloned()
                .ok_or(SessionError::Unauthenticated)?;
            self.resolutions.fetch_add(1, Ordering::SeqCst);
            Ok(ResolvedSession {
                identity,
                client: Arc::new(CountingClient {
                    released: Arc::clone(&self.released),
                }),
            })
        })
    }
}
