//! Bounded busy-wait for bring-up code.
//!
//! The production idle path never polls; it sleeps and lets the completion
//! event wake it. Self-tests and host harnesses that need a synchronous answer
//! use [`spin_until_idle`] instead.

use core::fmt;

/// The busy flag was still set after the whole polling budget was spent.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SpinTimeout {
    pub attempts: u32,
}

impl fmt::Display for SpinTimeout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bus still busy after {} polls", self.attempts)
    }
}

/// Polls `busy` until it returns `false`, at most `budget` times.
///
/// Returns how many polls reported busy before the bus went idle.
///
/// # Errors
///
/// [`SpinTimeout`] when `busy` never reports idle within `budget` polls.
pub fn spin_until_idle<F>(mut busy: F, budget: u32) -> Result<u32, SpinTimeout>
where
    F: FnMut() -> bool,
{
    for attempt in 0..budget {
        if !busy() {
            return Ok(attempt);
        }
        core::hint::spin_loop();
    }
    Err(SpinTimeout { attempts: budget })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idle_bus_returns_immediately() {
        assert_eq!(spin_until_idle(|| false, 10), Ok(0));
    }

    #[test]
    fn counts_busy_polls() {
        let mut remaining = 3;
        let result = spin_until_idle(
            || {
                if remaining == 0 {
                    return false;
                }
                remaining -= 1;
                true
            },
            10,
        );
        assert_eq!(result, Ok(3));
    }

    #[test]
    fn budget_exhaustion_is_reported() {
        assert_eq!(spin_until_idle(|| true, 4), Err(SpinTimeout { attempts: 4 }));
    }
}
