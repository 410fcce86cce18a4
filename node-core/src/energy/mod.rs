//! Sleep-depth arbitration.
//!
//! Subsystems that cannot tolerate a given energy mode vote against it with
//! [`EnergyArbiter::block`] and withdraw the vote with
//! [`EnergyArbiter::unblock`]. The idle loop asks the arbiter to enter the
//! deepest mode nobody has blocked.
//!
//! Mode numbering follows the usual EFM32/EM convention: [`EnergyMode::Em0`]
//! is fully running, [`EnergyMode::Em4`] is the deepest sleep. Blocking a mode
//! also forbids every deeper mode.

use core::cell::Cell;
use core::fmt;

use critical_section::{CriticalSection, Mutex};

/// Number of energy modes tracked by the arbiter.
pub const ENERGY_MODE_COUNT: usize = 5;

/// Upper bound on outstanding votes for a single mode. Exceeding it means a
/// caller is leaking votes.
pub const MAX_VOTES_PER_MODE: u8 = 5;

/// Hardware sleep depth, from fully active to deepest sleep.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum EnergyMode {
    Em0,
    Em1,
    Em2,
    Em3,
    Em4,
}

impl EnergyMode {
    /// Every mode, shallowest first.
    pub const ALL: [EnergyMode; ENERGY_MODE_COUNT] = [
        EnergyMode::Em0,
        EnergyMode::Em1,
        EnergyMode::Em2,
        EnergyMode::Em3,
        EnergyMode::Em4,
    ];

    /// Deepest mode; reported as the floor when nothing is blocked.
    pub const DEEPEST: EnergyMode = EnergyMode::Em4;

    /// Deterministic index into per-mode tables.
    #[must_use]
    pub const fn as_index(self) -> usize {
        match self {
            EnergyMode::Em0 => 0,
            EnergyMode::Em1 => 1,
            EnergyMode::Em2 => 2,
            EnergyMode::Em3 => 3,
            EnergyMode::Em4 => 4,
        }
    }

    /// Attempts to construct a mode from a raw index.
    #[must_use]
    pub const fn from_index(index: usize) -> Option<Self> {
        match index {
            0 => Some(EnergyMode::Em0),
            1 => Some(EnergyMode::Em1),
            2 => Some(EnergyMode::Em2),
            3 => Some(EnergyMode::Em3),
            4 => Some(EnergyMode::Em4),
            _ => None,
        }
    }

    /// Mode the idle loop enters when `self` is the current floor.
    ///
    /// Returns `None` when the core must stay awake. EM4 is never returned:
    /// leaving it requires a reset, which the idle path cannot survive.
    #[must_use]
    pub const fn idle_target(self) -> Option<EnergyMode> {
        match self {
            EnergyMode::Em0 | EnergyMode::Em1 => None,
            EnergyMode::Em2 => Some(EnergyMode::Em1),
            EnergyMode::Em3 => Some(EnergyMode::Em2),
            EnergyMode::Em4 => Some(EnergyMode::Em3),
        }
    }
}

impl fmt::Display for EnergyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EM{}", self.as_index())
    }
}

/// Misuse of the vote counters. Both variants are programming errors.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum EnergyFault {
    /// More than [`MAX_VOTES_PER_MODE`] outstanding votes for one mode.
    VoteOverflow(EnergyMode),
    /// `unblock` without a matching `block`.
    Unbalanced(EnergyMode),
}

impl fmt::Display for EnergyFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EnergyFault::VoteOverflow(mode) => write!(f, "too many votes blocking {mode}"),
            EnergyFault::Unbalanced(mode) => write!(f, "unblock of {mode} without a vote"),
        }
    }
}

/// Platform hook that performs the actual low-power entry.
///
/// [`enter`](Self::enter) is called with interrupts masked (the
/// [`CriticalSection`] token proves it). Implementations must use an
/// instruction that still wakes on a pending interrupt while masked, such as
/// Cortex-M `WFI` with PRIMASK set, and return once woken. The pending handler
/// then runs as soon as the caller leaves the critical section, so an
/// interrupt that arrives between the floor check and the sleep instruction
/// cannot be missed.
pub trait SleepControl {
    /// Enters `mode` and returns after wake-up.
    fn enter(&mut self, cs: CriticalSection<'_>, mode: EnergyMode);
}

/// Reference-counted "do not sleep below this level" votes.
///
/// All methods may be called from interrupt handlers or the application
/// thread; each one runs inside a critical section.
#[derive(Debug)]
pub struct EnergyArbiter {
    votes: Mutex<Cell<[u8; ENERGY_MODE_COUNT]>>,
}

impl EnergyArbiter {
    /// Creates an arbiter with no outstanding votes.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            votes: Mutex::new(Cell::new([0; ENERGY_MODE_COUNT])),
        }
    }

    /// Forbids `mode` and every deeper mode until the matching
    /// [`unblock`](Self::unblock).
    ///
    /// # Errors
    ///
    /// [`EnergyFault::VoteOverflow`] when the mode already holds
    /// [`MAX_VOTES_PER_MODE`] votes.
    pub fn block(&self, mode: EnergyMode) -> Result<(), EnergyFault> {
        critical_section::with(|cs| {
            let cell = self.votes.borrow(cs);
            let mut votes = cell.get();
            let slot = &mut votes[mode.as_index()];
            if *slot >= MAX_VOTES_PER_MODE {
                return Err(EnergyFault::VoteOverflow(mode));
            }
            *slot += 1;
            cell.set(votes);
            Ok(())
        })
    }

    /// Withdraws one vote against `mode`.
    ///
    /// # Errors
    ///
    /// [`EnergyFault::Unbalanced`] when no vote is outstanding for `mode`; the
    /// counters are left untouched.
    pub fn unblock(&self, mode: EnergyMode) -> Result<(), EnergyFault> {
        critical_section::with(|cs| {
            let cell = self.votes.borrow(cs);
            let mut votes = cell.get();
            let slot = &mut votes[mode.as_index()];
            if *slot == 0 {
                return Err(EnergyFault::Unbalanced(mode));
            }
            *slot -= 1;
            cell.set(votes);
            Ok(())
        })
    }

    /// Lowest-numbered mode with an outstanding vote, or
    /// [`EnergyMode::DEEPEST`] when there are none.
    pub fn current_floor(&self) -> EnergyMode {
        critical_section::with(|cs| self.floor_in(cs))
    }

    /// Outstanding votes against `mode`.
    pub fn votes(&self, mode: EnergyMode) -> u8 {
        critical_section::with(|cs| self.votes.borrow(cs).get()[mode.as_index()])
    }

    /// Drops every vote. Used once at start-up.
    pub fn reset(&self) {
        critical_section::with(|cs| self.votes.borrow(cs).set([0; ENERGY_MODE_COUNT]));
    }

    /// Sleeps as deeply as the current floor allows.
    ///
    /// `may_sleep` is evaluated inside the same critical section as the floor
    /// check and the call into `sleeper`, so work posted by an interrupt just
    /// before idling is seen here instead of waiting for the next wake-up.
    /// Returns the mode entered, or `None` if the core stayed awake.
    pub fn enter_idle<S, F>(&self, sleeper: &mut S, may_sleep: F) -> Option<EnergyMode>
    where
        S: SleepControl + ?Sized,
        F: FnOnce() -> bool,
    {
        critical_section::with(|cs| {
            let target = self.floor_in(cs).idle_target()?;
            if !may_sleep() {
                return None;
            }
            sleeper.enter(cs, target);
            Some(target)
        })
    }

    fn floor_in(&self, cs: CriticalSection<'_>) -> EnergyMode {
        let votes = self.votes.borrow(cs).get();
        votes
            .iter()
            .position(|&count| count != 0)
            .and_then(EnergyMode::from_index)
            .unwrap_or(EnergyMode::DEEPEST)
    }
}

impl Default for EnergyArbiter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use heapless::Vec;

    #[derive(Default)]
    struct RecordingSleep {
        entered: Vec<EnergyMode, 8>,
    }

    impl SleepControl for RecordingSleep {
        fn enter(&mut self, _: CriticalSection<'_>, mode: EnergyMode) {
            self.entered.push(mode).expect("sleep log overflow");
        }
    }

    #[test]
    fn floor_defaults_to_deepest() {
        let arbiter = EnergyArbiter::new();
        assert_eq!(arbiter.current_floor(), EnergyMode::Em4);
    }

    #[test]
    fn floor_tracks_shallowest_outstanding_vote() {
        let arbiter = EnergyArbiter::new();
        arbiter.block(EnergyMode::Em2).unwrap();
        arbiter.block(EnergyMode::Em3).unwrap();
        assert_eq!(arbiter.current_floor(), EnergyMode::Em2);

        arbiter.unblock(EnergyMode::Em2).unwrap();
        assert_eq!(arbiter.current_floor(), EnergyMode::Em3);

        arbiter.unblock(EnergyMode::Em3).unwrap();
        assert_eq!(arbiter.current_floor(), EnergyMode::Em4);
    }

    #[test]
    fn matched_pairs_restore_deepest_floor() {
        let arbiter = EnergyArbiter::new();
        for mode in EnergyMode::ALL {
            arbiter.block(mode).unwrap();
            arbiter.block(mode).unwrap();
        }
        for mode in EnergyMode::ALL.iter().rev() {
            arbiter.unblock(*mode).unwrap();
            arbiter.unblock(*mode).unwrap();
        }

        assert_eq!(arbiter.current_floor(), EnergyMode::DEEPEST);
        for mode in EnergyMode::ALL {
            assert_eq!(arbiter.votes(mode), 0);
        }
    }

    #[test]
    fn unbalanced_unblock_is_rejected() {
        let arbiter = EnergyArbiter::new();
        assert_eq!(
            arbiter.unblock(EnergyMode::Em1),
            Err(EnergyFault::Unbalanced(EnergyMode::Em1))
        );
        assert_eq!(arbiter.votes(EnergyMode::Em1), 0);
    }

    #[test]
    fn vote_leak_is_rejected() {
        let arbiter = EnergyArbiter::new();
        for _ in 0..MAX_VOTES_PER_MODE {
            arbiter.block(EnergyMode::Em2).unwrap();
        }
        assert_eq!(
            arbiter.block(EnergyMode::Em2),
            Err(EnergyFault::VoteOverflow(EnergyMode::Em2))
        );
        assert_eq!(arbiter.votes(EnergyMode::Em2), MAX_VOTES_PER_MODE);
    }

    #[test]
    fn enter_idle_follows_floor() {
        let arbiter = EnergyArbiter::new();
        let mut sleeper = RecordingSleep::default();

        assert_eq!(arbiter.enter_idle(&mut sleeper, || true), Some(EnergyMode::Em3));

        arbiter.block(EnergyMode::Em3).unwrap();
        assert_eq!(arbiter.enter_idle(&mut sleeper, || true), Some(EnergyMode::Em2));

        arbiter.block(EnergyMode::Em2).unwrap();
        assert_eq!(arbiter.enter_idle(&mut sleeper, || true), Some(EnergyMode::Em1));

        arbiter.block(EnergyMode::Em1).unwrap();
        assert_eq!(arbiter.enter_idle(&mut sleeper, || true), None);

        assert_eq!(
            sleeper.entered.as_slice(),
            &[EnergyMode::Em3, EnergyMode::Em2, EnergyMode::Em1]
        );
    }

    #[test]
    fn enter_idle_stays_awake_when_work_is_pending() {
        let arbiter = EnergyArbiter::new();
        let mut sleeper = RecordingSleep::default();

        assert_eq!(arbiter.enter_idle(&mut sleeper, || false), None);
        assert!(sleeper.entered.is_empty());
    }
}
