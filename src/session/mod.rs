//! # Sessions
//!
//! Bearer credential → user identity, with a bounded TTL cache in front of
//! the identity backend.

pub mod cache;
pub mod errors;
pub mod identity;

pub use cache::{SessionCache, SessionCacheConfig};
pub use errors::{SessionError, SessionResult};
pub use identity::{
    credential_digest, CredentialDigest, IdentityResolver, ResolvedSession, ScopedClient,
    StaticIdentity, StaticIdentityResolver, UserIdentity,
};
