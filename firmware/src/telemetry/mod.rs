//! Idle-loop telemetry.
//!
//! Each pass of the idle loop leaves one record: what it dispatched, which
//! mode it slept in and when. Passes that handled events are mirrored to
//! defmt on target and stdout on the host.

#![cfg_attr(not(target_os = "none"), allow(dead_code))]

use embassy_time::{Duration, Instant};
use heapless::HistoryBuf;
use node_core::energy::{ENERGY_MODE_COUNT, EnergyMode};
use node_core::scheduler::EventSet;

/// Idle passes retained in memory.
pub const TELEMETRY_RING_CAPACITY: usize = 32;

pub type TelemetryRing = HistoryBuf<IdleRecord, TELEMETRY_RING_CAPACITY>;

/// One pass of the idle loop.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IdleRecord {
    pub id: u32,
    pub timestamp: Instant,
    pub handled: EventSet,
    /// `None` when the floor kept the core awake.
    pub entered: Option<EnergyMode>,
    pub since_previous: Option<Duration>,
}

pub struct TelemetryRecorder {
    ring: TelemetryRing,
    last_cycle_at: Option<Instant>,
    next_id: u32,
    entered: [u32; ENERGY_MODE_COUNT],
    awake: u32,
}

impl TelemetryRecorder {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            ring: HistoryBuf::new(),
            last_cycle_at: None,
            next_id: 0,
            entered: [0; ENERGY_MODE_COUNT],
            awake: 0,
        }
    }

    /// Records one idle pass and logs it if it handled anything.
    pub fn record_cycle(
        &mut self,
        timestamp: Instant,
        handled: EventSet,
        entered: Option<EnergyMode>,
    ) -> u32 {
        let since_previous = self
            .last_cycle_at
            .map(|previous| timestamp.saturating_duration_since(previous));
        self.last_cycle_at = Some(timestamp);

        match entered {
            Some(mode) => {
                let count = &mut self.entered[mode.as_index()];
                *count = count.wrapping_add(1);
            }
            None => self.awake = self.awake.wrapping_add(1),
        }

        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1);
        let record = IdleRecord {
            id,
            timestamp,
            handled,
            entered,
            since_previous,
        };
        self.ring.write(record);

        if !handled.is_empty() {
            log_cycle(&record);
        }
        id
    }

    /// Times the loop slept in `mode`.
    #[must_use]
    pub fn sleeps_in(&self, mode: EnergyMode) -> u32 {
        self.entered[mode.as_index()]
    }

    /// Passes that did not sleep.
    #[must_use]
    pub const fn awake_passes(&self) -> u32 {
        self.awake
    }

    pub fn oldest_first(&self) -> impl Iterator<Item = &IdleRecord> + '_ {
        self.ring.oldest_ordered()
    }

    #[must_use]
    pub fn latest(&self) -> Option<&IdleRecord> {
        self.ring.recent()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.ring.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }
}

impl Default for TelemetryRecorder {
    fn default() -> Self {
        Self::new()
    }
}

fn log_cycle(record: &IdleRecord) {
    let mode = record.entered.map_or(0, EnergyMode::as_index);
    let awake = record.entered.is_none();
    emit_log(
        record.id,
        record.handled.bits(),
        awake,
        mode,
        record.timestamp.as_micros(),
        record.since_previous.map(|delta| delta.as_micros()),
    );
}

#[cfg(target_os = "none")]
fn emit_log(id: u32, handled: u32, awake: bool, mode: usize, timestamp_us: u64, delta_us: Option<u64>) {
    match (awake, delta_us) {
        (true, _) => defmt::info!("telemetry:idle #{} events={:#x} awake t={}us", id, handled, timestamp_us),
        (false, Some(delta)) => defmt::info!(
            "telemetry:idle #{} events={:#x} EM{} t={}us Δ={}us",
            id,
            handled,
            mode,
            timestamp_us,
            delta
        ),
        (false, None) => defmt::info!(
            "telemetry:idle #{} events={:#x} EM{} t={}us",
            id,
            handled,
            mode,
            timestamp_us
        ),
    }
}

#[cfg(not(target_os = "none"))]
fn emit_log(id: u32, handled: u32, awake: bool, mode: usize, timestamp_us: u64, delta_us: Option<u64>) {
    let sleep = if awake { String::from("awake") } else { format!("EM{mode}") };
    match delta_us {
        Some(delta) => println!("telemetry:idle #{id} events={handled:#x} {sleep} t={timestamp_us}us Δ={delta}us"),
        None => println!("telemetry:idle #{id} events={handled:#x} {sleep} t={timestamp_us}us"),
    }
}
