//! # Waiters
//!
//! A waiter is a parked long-poll request. It is a one-shot wake handle kept
//! in its instance's `WaiterSet` and resolved at most once, by whichever
//! transition satisfies it first. Resolution removes it from the set.

use std::collections::HashMap;
use std::time::Instant;

use tokio::sync::oneshot;

use super::document::UserId;

/// Why a waiter was resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wake {
    /// The document moved past the requested version
    VersionAdvanced { version: u64 },
    /// Another user's position changed
    PositionsChanged,
    /// The instance was invalidated
    Invalidated,
    /// No qualifying change before the deadline
    TimedOut,
}

/// What a waiter is waiting for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interest {
    /// Version bumps and position changes
    Events,
    /// Position changes only
    Positions,
}

/// Waiter identifier, unique within one instance
pub type WaiterId = u64;

#[derive(Debug)]
pub(crate) struct Waiter {
    requested_version: u64,
    exclude_user: Option<UserId>,
    interest: Interest,
    created_at: Instant,
    wake: oneshot::Sender<Wake>,
}

impl Waiter {
    pub(crate) fn new(
        requested_version: u64,
        exclude_user: Option<UserId>,
        interest: Interest,
    ) -> (Self, oneshot::Receiver<Wake>) {
        let (tx, rx) = oneshot::channel();
        let waiter = Self {
            requested_version,
            exclude_user,
            interest,
            created_at: Instant::now(),
            wake: tx,
        };
        (waiter, rx)
    }

    /// Satisfied by the document reaching `version`
    pub(crate) fn wants_version(&self, version: u64) -> bool {
        self.interest == Interest::Events && self.requested_version < version
    }

    /// Satisfied by `user` moving their cursor
    pub(crate) fn wants_position_from(&self, user: UserId) -> bool {
        self.exclude_user != Some(user)
    }

    /// Deliver the wake; false if the requester already went away
    pub(crate) fn resolve(self, wake: Wake) -> bool {
        self.wake.send(wake).is_ok()
    }
}

/// Pending waiters of one instance
#[derive(Debug, Default)]
pub(crate) struct WaiterSet {
    next_id: WaiterId,
    waiters: HashMap<WaiterId, Waiter>,
}

impl WaiterSet {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn insert(&mut self, waiter: Waiter) -> WaiterId {
        self.next_id += 1;
        self.waiters.insert(self.next_id, waiter);
        self.next_id
    }

    /// Deregister without resolving (abort or timeout)
    pub(crate) fn remove(&mut self, id: WaiterId) -> bool {
        self.waiters.remove(&id).is_some()
    }

    /// Resolve every waiter satisfied by `version`
    pub(crate) fn wake_version(&mut self, version: u64) -> usize {
        self.resolve_where(|w| w.wants_version(version), Wake::VersionAdvanced { version })
    }

    /// Resolve every waiter that does not exclude `user`
    pub(crate) fn wake_positions(&mut self, user: UserId) -> usize {
        self.resolve_where(|w| w.wants_position_from(user), Wake::PositionsChanged)
    }

    /// Resolve everything
    pub(crate) fn wake_all(&mut self, wake: Wake) -> usize {
        self.resolve_where(|_| true, wake)
    }

    fn resolve_where<F>(&mut self, predicate: F, wake: Wake) -> usize
    where
        F: Fn(&Waiter) -> bool,
    {
        let ids: Vec<WaiterId> = self
            .waiters
            .iter()
            .filter(|(_, w)| predicate(w))
            .map(|(id, _)| *id)
            .collect();

        ids.into_iter()
            .filter_map(|id| self.waiters.remove(&id))
            .map(|w| w.resolve(wake))
            .filter(|sent| *sent)
            .count()
    }

    /// Oldest pending registration, for diagnostics
    pub(crate) fn oldest(&self) -> Option<Instant> {
        self.waiters.values().map(|w| w.created_at).min()
    }

    pub(crate) fn len(&self) -> usize {
        self.waiters.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.waiters.is_empty()
    }
}
