use heapless::Vec;

use super::machine::Advance;
use super::{BusFault, BusId, BusInterrupt, BusPeripheral, TransactionDescriptor, TransactionRequest};
use crate::energy::{EnergyArbiter, EnergyMode};
use crate::scheduler::EventScheduler;

/// Energy mode every in-flight transaction blocks. The bus controller loses
/// its clock below EM1.
pub const DEFAULT_BUS_SLEEP_BLOCK: EnergyMode = EnergyMode::Em2;

/// Tunables shared by every bus owned by one [`BusManager`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BusConfig {
    /// Mode voted against from launch until STOP completes.
    pub sleep_block: EnergyMode,
}

impl BusConfig {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            sleep_block: DEFAULT_BUS_SLEEP_BLOCK,
        }
    }

    #[must_use]
    pub const fn with_sleep_block(mut self, mode: EnergyMode) -> Self {
        self.sleep_block = mode;
        self
    }
}

impl Default for BusConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Application-side view of the bus layer.
///
/// Implemented by [`BusManager`] directly and by firmware wrappers that keep
/// the manager behind an interrupt-safe lock.
pub trait TransactionPort {
    /// Starts `request` on its bus.
    ///
    /// # Errors
    ///
    /// Any [`BusFault`]; all of them are fatal.
    fn launch(&mut self, request: TransactionRequest) -> Result<(), BusFault>;

    /// Whether `bus` has a transaction in flight. Unknown buses report busy.
    fn is_busy(&self, bus: BusId) -> bool;

    /// Returns the buffer of the last completed transaction on `bus`.
    ///
    /// # Errors
    ///
    /// [`BusFault::InFlight`] while the bus is busy, [`BusFault::UnknownBus`]
    /// for a bus that was never opened.
    fn take_result(&mut self, bus: BusId) -> Result<u16, BusFault>;
}

struct BusSlot<B> {
    peripheral: B,
    descriptor: TransactionDescriptor,
}

/// Fixed table of buses, one descriptor each.
///
/// [`launch`](Self::launch), [`is_busy`](Self::is_busy) and
/// [`take_result`](Self::take_result) run on the application thread;
/// [`on_interrupt`](Self::on_interrupt) runs in the bus interrupt handler. The
/// owner is responsible for serialising the two, typically by keeping the
/// manager in a critical-section mutex.
pub struct BusManager<'a, B, const N: usize = 2> {
    slots: Vec<BusSlot<B>, N>,
    arbiter: &'a EnergyArbiter,
    scheduler: &'a EventScheduler,
    config: BusConfig,
}

impl<'a, B, const N: usize> BusManager<'a, B, N>
where
    B: BusPeripheral,
{
    /// Creates a manager with no buses open.
    #[must_use]
    pub const fn new(
        arbiter: &'a EnergyArbiter,
        scheduler: &'a EventScheduler,
        config: BusConfig,
    ) -> Self {
        Self {
            slots: Vec::new(),
            arbiter,
            scheduler,
            config,
        }
    }

    pub const fn config(&self) -> BusConfig {
        self.config
    }

    /// Registers `bus` and runs its one-time bus-reset sequence.
    ///
    /// # Errors
    ///
    /// [`BusFault::AlreadyOpen`] if `bus` is registered, [`BusFault::TableFull`]
    /// once `N` buses are open.
    pub fn open(&mut self, bus: BusId, mut peripheral: B) -> Result<(), BusFault> {
        if self.slot(bus).is_some() {
            return Err(BusFault::AlreadyOpen(bus));
        }
        peripheral.reset_bus();
        self.slots
            .push(BusSlot {
                peripheral,
                descriptor: TransactionDescriptor::idle(bus),
            })
            .map_err(|_| BusFault::TableFull(bus))
    }

    /// Seeds the bus descriptor from `request`, blocks
    /// [`BusConfig::sleep_block`] and sends START plus the write-address byte.
    ///
    /// # Errors
    ///
    /// [`BusFault::UnknownBus`], [`BusFault::Busy`] when a transaction is
    /// already in flight, or [`BusFault::Energy`] if the vote cannot be taken.
    pub fn launch(&mut self, request: TransactionRequest) -> Result<(), BusFault> {
        let bus = request.bus;
        let arbiter = self.arbiter;
        let sleep_block = self.config.sleep_block;
        let slot = self.slot_mut(bus).ok_or(BusFault::UnknownBus(bus))?;
        if slot.descriptor.is_busy() {
            return Err(BusFault::Busy(bus));
        }

        arbiter.block(sleep_block)?;
        slot.descriptor.begin(&request, &mut slot.peripheral);
        Ok(())
    }

    /// Busy flag of `bus`; `true` for a bus that was never opened.
    pub fn is_busy(&self, bus: BusId) -> bool {
        self.slot(bus).is_none_or(|slot| slot.descriptor.is_busy())
    }

    /// Advances the transaction on `bus` by one hardware event. On STOP
    /// completion the sleep vote is released and the completion event posted.
    ///
    /// # Errors
    ///
    /// [`BusFault::Protocol`] for an interrupt the current phase does not
    /// accept, [`BusFault::UnknownBus`] or [`BusFault::Energy`].
    pub fn on_interrupt(&mut self, bus: BusId, interrupt: BusInterrupt) -> Result<(), BusFault> {
        let arbiter = self.arbiter;
        let scheduler = self.scheduler;
        let sleep_block = self.config.sleep_block;
        let slot = self.slot_mut(bus).ok_or(BusFault::UnknownBus(bus))?;

        match slot.descriptor.advance(interrupt, &mut slot.peripheral)? {
            Advance::Continue => {}
            Advance::Completed(event) => {
                arbiter.unblock(sleep_block)?;
                if let Some(event) = event {
                    scheduler.post(event);
                }
            }
        }
        Ok(())
    }

    /// Current descriptor of `bus`.
    pub fn descriptor(&self, bus: BusId) -> Option<&TransactionDescriptor> {
        self.slot(bus).map(|slot| &slot.descriptor)
    }

    /// Hands the transaction buffer back to the caller, leaving zero behind.
    ///
    /// # Errors
    ///
    /// [`BusFault::InFlight`] while the bus is busy; [`BusFault::UnknownBus`].
    pub fn take_result(&mut self, bus: BusId) -> Result<u16, BusFault> {
        let slot = self.slot_mut(bus).ok_or(BusFault::UnknownBus(bus))?;
        if slot.descriptor.is_busy() {
            return Err(BusFault::InFlight(bus));
        }
        Ok(slot.descriptor.take_buffer())
    }

    /// Direct access to the peripheral behind `bus`.
    pub fn peripheral_mut(&mut self, bus: BusId) -> Option<&mut B> {
        self.slot_mut(bus).map(|slot| &mut slot.peripheral)
    }

    /// Buses opened so far, in open order.
    pub fn buses(&self) -> impl Iterator<Item = BusId> + '_ {
        self.slots.iter().map(|slot| slot.descriptor.bus())
    }

    fn slot(&self, bus: BusId) -> Option<&BusSlot<B>> {
        self.slots.iter().find(|slot| slot.descriptor.bus() == bus)
    }

    fn slot_mut(&mut self, bus: BusId) -> Option<&mut BusSlot<B>> {
        self.slots.iter_mut().find(|slot| slot.descriptor.bus() == bus)
    }
}

impl<B, const N: usize> TransactionPort for BusManager<'_, B, N>
where
    B: BusPeripheral,
{
    fn launch(&mut self, request: TransactionRequest) -> Result<(), BusFault> {
        BusManager::launch(self, request)
    }

    fn is_busy(&self, bus: BusId) -> bool {
        BusManager::is_busy(self, bus)
    }

    fn take_result(&mut self, bus: BusId) -> Result<u16, BusFault> {
        BusManager::take_result(self, bus)
    }
}
