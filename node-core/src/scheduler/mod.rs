//! Pending-event bitmask shared between interrupt handlers and the idle loop.
//!
//! Interrupt handlers [`post`](EventScheduler::post) completion events; the
//! application thread reads a snapshot with [`pending`](EventScheduler::pending)
//! and [`clear`](EventScheduler::clear)s each bit as it starts handling it. Every
//! mutation is a single read-modify-write on one atomic word, so a handler that
//! fires halfway through an application-side update can never lose a bit.
//! `portable-atomic` falls back to a critical section on cores without native
//! atomic RMW instructions (Cortex-M0+), which keeps the same guarantee there.

use core::fmt;

use portable_atomic::{AtomicU32, Ordering};

/// Number of distinct event identifiers a scheduler can track.
pub const MAX_EVENTS: u8 = 32;

/// Identifier of one application-level event, stored as a bit position.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct EventId(u8);

impl EventId {
    /// Creates an event identifier for bit `bit`.
    ///
    /// # Panics
    ///
    /// Panics (at compile time when used in a `const`) if `bit` is not below
    /// [`MAX_EVENTS`].
    #[must_use]
    pub const fn new(bit: u8) -> Self {
        assert!(bit < MAX_EVENTS, "event bit out of range");
        Self(bit)
    }

    /// Returns the bit position backing this identifier.
    #[must_use]
    pub const fn bit(self) -> u8 {
        self.0
    }

    /// Returns the single-bit mask for this identifier.
    #[must_use]
    pub const fn mask(self) -> u32 {
        1 << self.0
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "event#{}", self.0)
    }
}

/// Set of event identifiers with union semantics.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct EventSet(u32);

impl EventSet {
    /// The empty set.
    pub const EMPTY: Self = Self(0);

    /// Builds a set from a raw bitmask.
    #[must_use]
    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    /// Returns the raw bitmask.
    #[must_use]
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Returns `true` when `event` is a member.
    #[must_use]
    pub const fn contains(self, event: EventId) -> bool {
        self.0 & event.mask() != 0
    }

    /// Returns `true` when no events are members.
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Number of member events.
    #[must_use]
    pub const fn len(self) -> u32 {
        self.0.count_ones()
    }

    /// Returns a copy of the set with `event` added.
    #[must_use]
    pub const fn with(self, event: EventId) -> Self {
        Self(self.0 | event.mask())
    }

    /// Returns a copy of the set with `event` removed.
    #[must_use]
    pub const fn without(self, event: EventId) -> Self {
        Self(self.0 & !event.mask())
    }

    /// Iterates member events in ascending bit order.
    #[must_use]
    pub const fn iter(self) -> EventIter {
        EventIter { remaining: self.0 }
    }
}

impl IntoIterator for EventSet {
    type Item = EventId;
    type IntoIter = EventIter;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl FromIterator<EventId> for EventSet {
    fn from_iter<I: IntoIterator<Item = EventId>>(iter: I) -> Self {
        iter.into_iter().fold(Self::EMPTY, EventSet::with)
    }
}

/// Iterator over the members of an [`EventSet`], lowest bit first.
#[derive(Clone, Debug)]
pub struct EventIter {
    remaining: u32,
}

impl Iterator for EventIter {
    type Item = EventId;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        // trailing_zeros of a non-zero u32 is at most 31
        #[allow(clippy::cast_possible_truncation)]
        let bit = self.remaining.trailing_zeros() as u8;
        self.remaining &= self.remaining - 1;
        Some(EventId(bit))
    }
}

/// Process-wide pending-event set.
///
/// Calling contexts:
/// - [`post`](Self::post): interrupt handlers or the application thread.
/// - [`clear`](Self::clear), [`drain`](Self::drain): application thread.
/// - [`pending`](Self::pending): any context; returns a snapshot.
#[derive(Debug)]
pub struct EventScheduler {
    pending: AtomicU32,
}

impl EventScheduler {
    /// Creates a scheduler with no pending events.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            pending: AtomicU32::new(0),
        }
    }

    /// Merges `event` into the pending set. Posting an already-pending event
    /// is a no-op.
    pub fn post(&self, event: EventId) {
        self.pending.fetch_or(event.mask(), Ordering::AcqRel);
    }

    /// Removes `event` from the pending set.
    pub fn clear(&self, event: EventId) {
        self.pending.fetch_and(!event.mask(), Ordering::AcqRel);
    }

    /// Removes `event` and reports whether it was pending.
    pub fn take(&self, event: EventId) -> bool {
        self.pending.fetch_and(!event.mask(), Ordering::AcqRel) & event.mask() != 0
    }

    /// Returns the current pending set.
    pub fn pending(&self) -> EventSet {
        EventSet(self.pending.load(Ordering::Acquire))
    }

    /// Atomically removes and returns every pending event.
    pub fn drain(&self) -> EventSet {
        EventSet(self.pending.swap(0, Ordering::AcqRel))
    }

    /// Forgets every pending event. Used once at start-up.
    pub fn reset(&self) {
        self.pending.store(0, Ordering::Release);
    }
}

impl Default for EventScheduler {
    fn default() -> Self {
        Self::new()
    }
}
