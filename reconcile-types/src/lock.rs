use std::fmt;
use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;

use nutype::nutype;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::event::{EventId, SourceId};

/// Identifier of the resource a lock protects.
///
/// Any string is a valid resource id; the dispatcher uses the event id and
/// business services use the id of the record they mutate.
#[nutype(derive(
    Debug,
    Clone,
    PartialEq,
    Eq,
    Hash,
    AsRef,
    Deref,
    Display,
    Serialize,
    Deserialize
))]
pub struct ResourceId(String);

impl From<&EventId> for ResourceId {
    fn from(id: &EventId) -> Self {
        Self::new(id.to_string())
    }
}

impl From<&SourceId> for ResourceId {
    fn from(id: &SourceId) -> Self {
        Self::new(id.as_ref().to_string())
    }
}

/// Closed set of lock namespaces.
///
/// The same resource id locked under two categories yields two independent
/// locks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LockCategory {
    /// Serializes schema migrations across starting processes.
    Migrations,
    /// Guards read-modify-write sections on dinosaur records.
    Dinosaurs,
    /// Fail-fast lock taken by the dispatcher per delivered event.
    Events,
}

impl LockCategory {
    /// Every category, in declaration order.
    pub const ALL: [Self; 3] = [Self::Migrations, Self::Dinosaurs, Self::Events];

    /// String form hashed into the second advisory lock key.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Migrations => "migrations",
            Self::Dinosaurs => "dinosaurs",
            Self::Events => "events",
        }
    }
}

impl fmt::Display for LockCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a string does not name a known lock category.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown lock category `{0}`")]
pub struct UnknownLockCategory(pub String);

impl FromStr for LockCategory {
    type Err = UnknownLockCategory;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|category| category.as_str() == raw)
            .ok_or_else(|| UnknownLockCategory(raw.to_string()))
    }
}

/// Opaque token returned by every acquisition attempt.
///
/// Only the holder of the token can release the lock. A token is fresh per
/// attempt, so an inner call chain that was handed someone else's token
/// cannot end that lock by accident.
#[nutype(derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    AsRef,
    Display,
    Serialize,
    Deserialize
))]
pub struct OwnerToken(Uuid);

impl OwnerToken {
    /// A fresh random token.
    pub fn generate() -> Self {
        Self::new(Uuid::new_v4())
    }
}

const FNV_OFFSET_BASIS: u32 = 0x811c_9dc5;
const FNV_PRIME: u32 = 0x0100_0193;

/// 32-bit FNV-1a hash.
pub fn fnv1a_32(bytes: &[u8]) -> u32 {
    bytes.iter().fold(FNV_OFFSET_BASIS, |hash, byte| {
        (hash ^ u32::from(*byte)).wrapping_mul(FNV_PRIME)
    })
}

fn hash_key(raw: &str) -> i32 {
    i32::from_be_bytes(fnv1a_32(raw.as_bytes()).to_be_bytes())
}

/// The two signed 32-bit keys passed to the database's two-key advisory lock.
///
/// Both keys are the FNV-1a hash of a string, reinterpreted bit for bit as an
/// `i32`: the first of the resource id, the second of the category name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LockKey {
    resource: i32,
    category: i32,
}

impl LockKey {
    /// Hash `resource` and `category` into the two advisory-lock keys.
    pub fn new(resource: &ResourceId, category: LockCategory) -> Self {
        Self {
            resource: hash_key(resource.as_ref()),
            category: hash_key(category.as_str()),
        }
    }

    /// First key: FNV-1a of the resource id.
    pub const fn resource(&self) -> i32 {
        self.resource
    }

    /// Second key: FNV-1a of the category name.
    pub const fn category(&self) -> i32 {
        self.category
    }
}

/// Outcome of a non-blocking acquisition.
///
/// The owner token is returned even when `acquired` is `false`; the caller
/// still releases it to end the attempt's transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockAttempt {
    /// Token to pass to `release`, whether or not the lock was granted
    pub owner: OwnerToken,
    /// Whether the lock was granted
    pub acquired: bool,
}

/// Error returned by lock acquisition.
///
/// Lock unavailability in non-blocking mode is not an error; it is reported
/// through `LockAttempt::acquired`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LockError {
    /// The transaction that would hold the lock could not be started.
    #[error("failed to begin transaction for {category} lock on `{resource}`")]
    BeginFailed {
        resource: ResourceId,
        category: LockCategory,
    },

    /// The lock statement failed after its transaction opened.
    ///
    /// The factory has already ended the transaction; releasing `owner` is a
    /// no-op.
    #[error("failed to acquire {category} lock on `{resource}` for owner {owner}")]
    AcquireFailed {
        owner: OwnerToken,
        resource: ResourceId,
        category: LockCategory,
    },
}

/// Issues mutual-exclusion locks keyed by `(resource, category)` and tracks
/// the live ones by owner token.
///
/// A lock lives exactly as long as the transaction that holds it. The
/// factory is the only component that begins and ends those transactions, so
/// a crashed holder can never leave a lock behind: its connection dies, the
/// transaction ends, the lock is gone.
///
/// Dropping a pending `acquire_blocking` future abandons the wait.
pub trait LockFactory {
    /// Wait until the lock for `(resource, category)` is granted.
    fn acquire_blocking(
        &self,
        resource: &ResourceId,
        category: LockCategory,
    ) -> impl Future<Output = Result<OwnerToken, LockError>> + Send;

    /// Try once to take the lock for `(resource, category)` without waiting.
    fn acquire_non_blocking(
        &self,
        resource: &ResourceId,
        category: LockCategory,
    ) -> impl Future<Output = Result<LockAttempt, LockError>> + Send;

    /// End the attempt identified by `owner`, releasing its lock if held.
    ///
    /// Unknown tokens, including tokens released before, are ignored.
    fn release(&self, owner: &OwnerToken) -> impl Future<Output = ()> + Send;

    /// Run `critical` while holding the blocking lock for `(resource, category)`.
    ///
    /// The lock is released whether or not `critical` succeeds.
    fn with_lock<F, Fut, T, E>(
        &self,
        resource: &ResourceId,
        category: LockCategory,
        critical: F,
    ) -> impl Future<Output = Result<T, E>> + Send
    where
        Self: Sync,
        F: FnOnce(OwnerToken) -> Fut + Send,
        Fut: Future<Output = Result<T, E>> + Send,
        T: Send,
        E: From<LockError> + Send,
    {
        async move {
            let owner = self.acquire_blocking(resource, category).await?;
            let outcome = critical(owner).await;
            self.release(&owner).await;
            outcome
        }
    }
}

impl<T> LockFactory for &T
where
    T: LockFactory + Sync,
{
    fn acquire_blocking(
        &self,
        resource: &ResourceId,
        category: LockCategory,
    ) -> impl Future<Output = Result<OwnerToken, LockError>> + Send {
        (**self).acquire_blocking(resource, category)
    }

    fn acquire_non_blocking(
        &self,
        resource: &ResourceId,
        category: LockCategory,
    ) -> impl Future<Output = Result<LockAttempt, LockError>> + Send {
        (**self).acquire_non_blocking(resource, category)
    }

    fn release(&self, owner: &OwnerToken) -> impl Future<Output = ()> + Send {
        (**self).release(owner)
    }
}

impl<T> LockFactory for Arc<T>
where
    T: LockFactory + Send + Sync,
{
    fn acquire_blocking(
        &self,
        resource: &ResourceId,
        category: LockCategory,
    ) -> impl Future<Output = Result<OwnerToken, LockError>> + Send {
        (**self).acquire_blocking(resource, category)
    }

    fn acquire_non_blocking(
        &self,
        resource: &ResourceId,
        category: LockCategory,
    ) -> impl Future<Output = Result<LockAttempt, LockError>> + Send {
        (**self).acquire_non_blocking(resource, category)
    }

    fn release(&self, owner: &OwnerToken) -> impl Future<Output = ()> + Send {
        (**self).release(owner)
    }
}
