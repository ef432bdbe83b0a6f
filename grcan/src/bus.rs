//! A GRCAN DMA channel
//!
//! [`Channel`] owns the register block (through [`Dependencies`]) and both
//! rings of a [`SharedMemory`]. Transfers take `&self`, so one thread can
//! read while another writes, and [`Channel::close`] or a bus-off detected by
//! [`Channel::on_interrupt`] can release callers suspended in either
//! direction.

use crate::config::{
    compute_timing, BitTimingError, ChannelConfig, Timing, DEFAULT_SAMPLE_POINT,
    GRCANFD_DATA_TIMING_RANGES, GRCANFD_NOMINAL_TIMING_RANGES, GRCAN_TIMING_RANGES,
};
use crate::filter::Filter;
use crate::interrupt::{Interrupt, InterruptSet};
use crate::message::{Classic, Fd, FrameFormat, MAX_FRAME_SLOTS};
use crate::messageram::{Capacities, Descriptor, SharedMemory, RING_ALIGNMENT};
use crate::reg::{
    AccessRegisters as _, Conf, DataTiming, NominalTiming, Reg, Status, CTRL_ENABLE, CTRL_RESET,
    DMA_ENABLE, FILTER_DISABLED_MASK, IMR_DEFAULT, IRQ_ALL, OFFSET_MASK,
};
use crate::ring::{advance, available_to_read, available_to_write, Ring};
use crate::rx_ring::RxRing;
use crate::state::{Activity, Halt, Link, LinkState, Stats};
use crate::tx_ring::TxRing;
use core::marker::PhantomData;
use fugit::{HertzU32, MillisDurationU32};
use grcan_core::{CanId, Dependencies, RegisterAccess, Signal};
use vcell::VolatileCell;

/// Errors reported by transfers and state changes
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Error {
    /// Empty buffer, invalid frame length or invalid configuration
    InvalidArgument,
    /// The channel is stopped, or transmission is disabled (silent or
    /// flushing)
    NotStarted,
    /// [`Channel::start`] on a started channel
    AlreadyStarted,
    /// Nothing could be transferred without waiting
    WouldBlock,
    /// A bounded wait expired before anything was transferred
    Timeout,
    /// The controller went bus-off; the channel must be restarted
    BusOff,
    /// A DMA access failed; the channel must be restarted
    AhbError,
    /// The channel was closed
    Closed,
    /// A received descriptor did not hold a valid frame and was dropped
    InvalidFrame,
    /// Another caller is transferring in the same direction
    Busy,
}

impl Error {
    /// Negative integer code of the error
    pub fn code(self) -> i32 {
        match self {
            Error::InvalidArgument => -1,
            Error::NotStarted => -2,
            Error::WouldBlock | Error::Timeout => -3,
            Error::BusOff => -4,
            Error::AhbError => -5,
            Error::Closed => -6,
            Error::InvalidFrame => -7,
            Error::AlreadyStarted => -8,
            Error::Busy => -9,
        }
    }
}

impl embedded_can::Error for Error {
    fn kind(&self) -> embedded_can::ErrorKind {
        match self {
            Error::InvalidFrame => embedded_can::ErrorKind::Form,
            _ => embedded_can::ErrorKind::Other,
        }
    }
}

/// Errors that may occur during configuration
#[derive(Debug)]
pub enum ConfigurationError {
    /// Problems with the bit timing configuration
    BitTiming(BitTimingError),
    /// A ring is not a multiple of 4 slots, or cannot hold the largest frame
    /// plus the reserved slot
    InvalidRingSize,
    /// The core cannot reach the shared memory, or it is misaligned
    MemoryNotAddressable,
    /// Configuration is only possible while the channel is stopped
    NotStopped(Error),
}

impl ConfigurationError {
    /// Negative integer code of the error
    pub fn code(&self) -> i32 {
        match self {
            ConfigurationError::NotStopped(error) => error.code(),
            _ => Error::InvalidArgument.code(),
        }
    }
}

impl From<BitTimingError> for ConfigurationError {
    fn from(value: BitTimingError) -> Self {
        Self::BitTiming(value)
    }
}

enum Serviced {
    Spurious,
    Acknowledged,
    Progress(InterruptSet),
    Halted(Halt),
}

/// A GRCAN channel transferring frames of format `F` ([`Classic`] or
/// [`Fd`]).
pub struct Channel<'a, Id: CanId, D: Dependencies<Id>, C: Capacities, F: FrameFormat = Classic> {
    dependencies: D,
    config: ChannelConfig,
    /// `CONF` timing for GRCAN, `NBTR` for GRCANFD
    timing: Timing,
    /// `FDBTR`, GRCANFD only
    data_timing: Timing,
    acceptance: Option<Filter>,
    sync: Option<Filter>,
    link: Link,
    rx: RxRing<'a, F>,
    tx: TxRing<'a, F>,
    rx_address: u32,
    tx_address: u32,
    rx_signal: D::Signal,
    tx_signal: D::Signal,
    tx_empty_signal: D::Signal,
    _markers: PhantomData<(Id, C)>,
}

// Safety: Ring slots are written by the caller that claimed the direction
// (`Activity`), or by the core. Everything else shared between callers and
// the interrupt handler is behind a critical section, and the registers and
// signals are required to be `Sync`.
unsafe impl<Id, D, C, F> Sync for Channel<'_, Id, D, C, F>
where
    Id: CanId,
    D: Dependencies<Id> + Sync,
    D::Registers: Sync,
    D::Signal: Sync,
    C: Capacities,
    F: FrameFormat,
{
}

// Safety: The rings are only borrowed by this channel.
unsafe impl<Id, D, C, F> Send for Channel<'_, Id, D, C, F>
where
    Id: CanId,
    D: Dependencies<Id> + Send,
    D::Signal: Send,
    C: Capacities,
    F: FrameFormat,
{
}

fn max_frame_slots<F: FrameFormat>() -> usize {
    F::slots_for_length(F::MAX_LENGTH).unwrap_or(MAX_FRAME_SLOTS)
}

fn default_timing<F: FrameFormat>(
    bitrate: HertzU32,
    core_clock: HertzU32,
) -> Result<(Timing, Timing), BitTimingError> {
    if F::FD {
        Ok((
            compute_timing(
                bitrate,
                core_clock,
                DEFAULT_SAMPLE_POINT,
                &GRCANFD_NOMINAL_TIMING_RANGES,
            )?,
            compute_timing(
                bitrate,
                core_clock,
                DEFAULT_SAMPLE_POINT,
                &GRCANFD_DATA_TIMING_RANGES,
            )?,
        ))
    } else {
        Ok((
            compute_timing(bitrate, core_clock, DEFAULT_SAMPLE_POINT, &GRCAN_TIMING_RANGES)?,
            Timing::default(),
        ))
    }
}

impl<'a, Id: CanId, D: Dependencies<Id>, C: Capacities, F: FrameFormat> Channel<'a, Id, D, C, F> {
    /// Open a channel.
    ///
    /// Clears `memory`, resets the core and computes the bit timing for
    /// `bitrate` (both phases of an FD channel). The channel starts out
    /// [`LinkState::Stopped`] with the default [`ChannelConfig`], accepting
    /// every frame and with the sync filter disabled.
    pub fn new(
        bitrate: HertzU32,
        dependencies: D,
        memory: &'a mut SharedMemory<C>,
    ) -> Result<Self, ConfigurationError> {
        let memory: &'a _ = memory.init();
        let rx = Ring::new(memory.rx.0.as_slice());
        let tx = Ring::new(memory.tx.0.as_slice());
        for ring in [&rx, &tx] {
            if ring.capacity() % 4 != 0 || ring.capacity() <= max_frame_slots::<F>() {
                return Err(ConfigurationError::InvalidRingSize);
            }
        }
        let address = |ring: &Ring<'_>| {
            dependencies
                .dma_address(ring.slots().as_ptr() as *const ())
                .filter(|address| *address as usize % RING_ALIGNMENT == 0)
                .ok_or(ConfigurationError::MemoryNotAddressable)
        };
        let rx_address = address(&rx)?;
        let tx_address = address(&tx)?;
        let (timing, data_timing) = default_timing::<F>(bitrate, dependencies.core_clock())?;

        dependencies.registers().set(Reg::Ctrl, CTRL_RESET);
        log::debug!(
            "channel opened: {} rx slots, {} tx slots, {:?}",
            rx.capacity(),
            tx.capacity(),
            timing
        );
        Ok(Self {
            dependencies,
            config: ChannelConfig::default(),
            timing,
            data_timing,
            acceptance: None,
            sync: None,
            link: Link::new(),
            rx: RxRing::new(rx),
            tx: TxRing::new(tx),
            rx_address,
            tx_address,
            rx_signal: D::Signal::default(),
            tx_signal: D::Signal::default(),
            tx_empty_signal: D::Signal::default(),
            _markers: PhantomData,
        })
    }

    /// Raw access to the registers.
    ///
    /// # Safety
    /// The abstraction assumes that it has exclusive ownership of the
    /// registers. Direct access can break such assumptions.
    pub unsafe fn registers(&self) -> &D::Registers {
        self.dependencies.registers()
    }

    /// Raw access to the receive ring.
    ///
    /// # Safety
    /// Slots between the read and the write offset belong to the driver.
    pub unsafe fn rx_slots(&self) -> &[VolatileCell<Descriptor>] {
        self.rx.ring().slots()
    }

    /// Raw access to the transmit ring.
    ///
    /// # Safety
    /// Slots outside the read and the write offset belong to the driver.
    pub unsafe fn tx_slots(&self) -> &[VolatileCell<Descriptor>] {
        self.tx.ring().slots()
    }

    fn regs(&self) -> &D::Registers {
        self.dependencies.registers()
    }

    /// Current link state
    pub fn state(&self) -> LinkState {
        self.link.state()
    }

    /// Raw status register
    pub fn status(&self) -> Status {
        Status::from(self.regs().get(Reg::Stat))
    }

    /// Interrupt and frame counters
    pub fn stats(&self) -> Stats {
        self.link.stats()
    }

    /// Reset all counters to 0
    pub fn clear_stats(&self) {
        self.link.clear_stats();
    }

    /// Current configuration
    pub fn config(&self) -> &ChannelConfig {
        &self.config
    }

    /// Mutable access to the configuration, only while stopped. Changes take
    /// effect on the next [`Channel::start`].
    pub fn config_mut(&mut self) -> Result<&mut ChannelConfig, Error> {
        self.ensure_stopped()?;
        Ok(&mut self.config)
    }

    /// Slots received and not yet read
    pub fn rx_available(&self) -> usize {
        self.rx.available(self.regs())
    }

    /// Slots free for transmission
    pub fn tx_free(&self) -> usize {
        self.tx.free(self.regs())
    }

    fn ensure_stopped(&self) -> Result<(), Error> {
        match self.link.state() {
            LinkState::Stopped => Ok(()),
            LinkState::Started => Err(Error::AlreadyStarted),
            LinkState::BusOff(_) => Err(Error::NotStarted),
            LinkState::Closed => Err(Error::Closed),
        }
    }

    /// Set the acceptance filter; `None` accepts every frame
    pub fn set_acceptance_filter(&mut self, filter: Option<Filter>) -> Result<(), Error> {
        self.acceptance = filter;
        let regs = self.regs();
        let written = self.link.commit(|_| {
            write_filter(regs, Reg::RxCode, Reg::RxMask, filter.unwrap_or(Filter::ACCEPT_ALL))
        });
        match written {
            Err(Error::Closed) => Err(Error::Closed),
            _ => Ok(()),
        }
    }

    /// Set the sync filter; `None` disables sync detection
    pub fn set_sync_filter(&mut self, filter: Option<Filter>) -> Result<(), Error> {
        self.sync = filter;
        let regs = self.regs();
        let written = self.link.commit(|_| {
            write_filter(regs, Reg::Scode, Reg::Smask, sync_filter(filter))
        });
        match written {
            Err(Error::Closed) => Err(Error::Closed),
            _ => Ok(()),
        }
    }

    /// Program the core and enable reception.
    ///
    /// Configuration, timing, ring addresses and filters are written to the
    /// core, status and pending interrupts are cleared and the error
    /// interrupts unmasked.
    pub fn start(&self) -> Result<(), Error> {
        if self.config.wait_limit_divisor == 0 {
            return Err(Error::InvalidArgument);
        }
        match self.link.state() {
            LinkState::Started => return Err(Error::AlreadyStarted),
            LinkState::Closed => return Err(Error::Closed),
            _ => {}
        }
        self.rx_signal.reset();
        self.tx_signal.reset();
        self.tx_empty_signal.reset();

        let regs = self.regs();
        critical_section::with(|cs| {
            let state = self.link.cell(cs);
            match state.get() {
                LinkState::Started => return Err(Error::AlreadyStarted),
                LinkState::Closed => return Err(Error::Closed),
                _ => {}
            }
            self.configure(regs);
            state.set(LinkState::Started);
            Ok(())
        })?;
        log::debug!("channel started");
        Ok(())
    }

    fn configure(&self, regs: &D::Registers) {
        regs.set(Reg::Ctrl, 0);
        let mut conf = Conf::default();
        conf.set_silent(self.config.silent);
        conf.set_abort(self.config.abort);
        conf.set_selection(self.config.selection.selection);
        conf.set_enable0(self.config.selection.enable0);
        conf.set_enable1(self.config.selection.enable1);
        if F::FD {
            let mut nominal = NominalTiming::default();
            nominal.set_scaler(self.timing.scaler);
            nominal.set_ps1(self.timing.ps1);
            nominal.set_ps2(self.timing.ps2);
            nominal.set_sjw(self.timing.rsj);
            let mut data = DataTiming::default();
            data.set_scaler(self.data_timing.scaler);
            data.set_ps1(self.data_timing.ps1);
            data.set_ps2(self.data_timing.ps2);
            data.set_sjw(self.data_timing.rsj);
            regs.set(Reg::Nbtr, nominal.into());
            regs.set(Reg::Fdbtr, data.into());
        } else {
            conf.set_scaler(self.timing.scaler);
            conf.set_ps1(self.timing.ps1);
            conf.set_ps2(self.timing.ps2);
            conf.set_rsj(self.timing.rsj);
            conf.set_bpr(self.timing.bpr);
        }
        regs.set(Reg::Conf, conf.into());

        regs.set(Reg::RxAddr, self.rx_address);
        regs.set(Reg::RxSize, self.rx.ring().size() & OFFSET_MASK);
        regs.set(Reg::TxAddr, self.tx_address);
        regs.set(Reg::TxSize, self.tx.ring().size() & OFFSET_MASK);

        write_filter(
            regs,
            Reg::RxCode,
            Reg::RxMask,
            self.acceptance.unwrap_or(Filter::ACCEPT_ALL),
        );
        write_filter(regs, Reg::Scode, Reg::Smask, sync_filter(self.sync));

        regs.get(Reg::Stat);
        regs.set(Reg::Stat, 0);
        regs.get(Reg::Pir);
        regs.set(Reg::Picr, IRQ_ALL);
        regs.set(Reg::Imr, IMR_DEFAULT);

        regs.set(Reg::RxCtrl, DMA_ENABLE);
        regs.set(Reg::TxCtrl, DMA_ENABLE);
        regs.set(Reg::Ctrl, CTRL_ENABLE);
    }

    /// Stop the channel, releasing suspended callers with
    /// [`Error::NotStarted`].
    ///
    /// Also leaves [`LinkState::BusOff`] for [`LinkState::Stopped`] so the
    /// configuration can be changed.
    pub fn stop(&self) -> Result<(), Error> {
        let regs = self.regs();
        let was_started = critical_section::with(|cs| {
            let state = self.link.cell(cs);
            let was_started = match state.get() {
                LinkState::Stopped => return Err(Error::NotStarted),
                LinkState::Closed => return Err(Error::Closed),
                LinkState::Started => {
                    halt(regs);
                    true
                }
                LinkState::BusOff(_) => false,
            };
            state.set(LinkState::Stopped);
            Ok(was_started)
        })?;
        if was_started {
            self.wake_all();
        }
        log::debug!("channel stopped");
        Ok(())
    }

    /// Stop the channel if needed and reset the core. Suspended callers are
    /// released with [`Error::Closed`], as is every later call.
    pub fn close(&self) -> Result<(), Error> {
        let regs = self.regs();
        critical_section::with(|cs| {
            let state = self.link.cell(cs);
            match state.get() {
                LinkState::Closed => return Err(Error::Closed),
                LinkState::Started => halt(regs),
                _ => {}
            }
            regs.set(Reg::Ctrl, CTRL_RESET);
            state.set(LinkState::Closed);
            Ok(())
        })?;
        self.wake_all();
        log::debug!("channel closed");
        Ok(())
    }

    /// Reset the core and give back the dependencies
    pub fn release(self) -> D {
        self.dependencies.registers().set(Reg::Ctrl, CTRL_RESET);
        self.dependencies
    }

    fn wake_all(&self) {
        self.rx_signal.notify_all();
        self.tx_signal.notify_all();
        self.tx_empty_signal.notify_all();
    }

    /// Receive frames into `frames`, returning how many were received.
    ///
    /// Behaviour follows [`ChannelConfig::rx`]: a non-blocking call returns
    /// [`Error::WouldBlock`] when nothing was received; a blocking call
    /// suspends until at least one frame arrived, or all of them in complete
    /// mode. A halt of the link while suspended is reported as an error even
    /// when frames were already received by the same call.
    pub fn read(&self, frames: &mut [F::Frame]) -> Result<usize, Error> {
        if frames.is_empty() {
            return Err(Error::InvalidArgument);
        }
        self.link.check()?;
        let _claim = self.link.claim(Activity::Receive)?;
        let config = self.config.rx;
        let capacity = self.rx.ring().capacity();
        let limit = (capacity / usize::from(self.config.wait_limit_divisor.max(1))).max(1);
        let mut moved = 0;
        loop {
            match self.rx.receive(self.regs(), &self.link, &mut frames[moved..]) {
                Ok(n) => moved += n,
                Err(Error::InvalidFrame) if moved > 0 => return Ok(moved),
                Err(e) => return Err(e),
            }
            if moved == frames.len() || (moved > 0 && !config.complete) {
                return Ok(moved);
            }
            if !config.blocking {
                return if moved == 0 {
                    Err(Error::WouldBlock)
                } else {
                    Ok(moved)
                };
            }
            let min = if config.complete {
                (frames.len() - moved).min(limit)
            } else {
                1
            };
            match self.wait_rx(min.min(capacity - 1), config.timeout) {
                Ok(()) => {}
                Err(Error::Timeout) if moved > 0 => return Ok(moved),
                Err(e) => return Err(e),
            }
        }
    }

    /// Receive whatever is available without waiting
    pub fn try_read(&self, frames: &mut [F::Frame]) -> nb::Result<usize, Error> {
        if frames.is_empty() {
            return Err(nb::Error::Other(Error::InvalidArgument));
        }
        let _claim = self.link.claim(Activity::Receive)?;
        match self.rx.receive(self.regs(), &self.link, frames)? {
            0 => Err(nb::Error::WouldBlock),
            n => Ok(n),
        }
    }

    /// Suspend until `min` slots are filled, the link halts, or `timeout`
    /// expires.
    fn wait_rx(&self, min: usize, timeout: Option<MillisDurationU32>) -> Result<(), Error> {
        let regs = self.regs();
        let size = self.rx.ring().size();
        let wait = self.link.commit(|_| {
            let read = regs.get(Reg::RxRd) & OFFSET_MASK;
            regs.set(Reg::RxIrq, advance(read, min as u32, size));
            regs.set(Reg::Picr, Interrupt::RxPointer.into());
            let write = regs.get(Reg::RxWr) & OFFSET_MASK;
            if (available_to_read(read, write, size) as usize) < min {
                regs.modify(Reg::Imr, |imr| imr | u32::from(Interrupt::RxPointer));
                true
            } else {
                false
            }
        })?;
        if wait {
            self.suspend(&self.rx_signal, timeout)?;
        }
        Ok(())
    }

    /// Queue frames from `frames`, returning how many were queued.
    ///
    /// Behaviour follows [`ChannelConfig::tx`], like [`Channel::read`]. A
    /// frame with an invalid length fails the call with
    /// [`Error::InvalidArgument`] if it is the first one and ends it
    /// otherwise.
    pub fn write(&self, frames: &[F::Frame]) -> Result<usize, Error> {
        if frames.is_empty() {
            return Err(Error::InvalidArgument);
        }
        self.link.check()?;
        if self.config.silent || self.link.is_running(Activity::Flush) {
            return Err(Error::NotStarted);
        }
        let _claim = self.link.claim(Activity::Transmit)?;
        let config = self.config.tx;
        let capacity = self.tx.ring().capacity();
        let limit = capacity / usize::from(self.config.wait_limit_divisor.max(1));
        let mut moved = 0;
        loop {
            match self.tx.transmit(self.regs(), &self.link, &frames[moved..]) {
                Ok(n) => moved += n,
                Err(Error::InvalidArgument) if moved > 0 => return Ok(moved),
                Err(e) => return Err(e),
            }
            if moved == frames.len() || (moved > 0 && !config.complete) {
                return Ok(moved);
            }
            if !config.blocking {
                return if moved == 0 {
                    Err(Error::WouldBlock)
                } else {
                    Ok(moved)
                };
            }
            let Ok(next) = F::slots_for(&frames[moved]) else {
                return Ok(moved);
            };
            let min = if config.complete {
                let remaining: usize = frames[moved..]
                    .iter()
                    .map_while(|frame| F::slots_for(frame).ok())
                    .sum();
                remaining.min(limit).max(next)
            } else {
                next
            };
            match self.wait_tx(min.min(capacity - 1), config.timeout) {
                Ok(()) => {}
                Err(Error::Timeout) if moved > 0 => return Ok(moved),
                Err(e) => return Err(e),
            }
        }
    }

    /// Queue what fits without waiting
    pub fn try_write(&self, frames: &[F::Frame]) -> nb::Result<usize, Error> {
        if frames.is_empty() {
            return Err(nb::Error::Other(Error::InvalidArgument));
        }
        if self.config.silent || self.link.is_running(Activity::Flush) {
            return Err(nb::Error::Other(Error::NotStarted));
        }
        let _claim = self.link.claim(Activity::Transmit)?;
        match self.tx.transmit(self.regs(), &self.link, frames)? {
            0 => Err(nb::Error::WouldBlock),
            n => Ok(n),
        }
    }

    /// Suspend until `min` slots are free, the link halts, or `timeout`
    /// expires.
    fn wait_tx(&self, min: usize, timeout: Option<MillisDurationU32>) -> Result<(), Error> {
        let regs = self.regs();
        let size = self.tx.ring().size();
        let wait = self.link.commit(|_| {
            regs.modify(Reg::TxCtrl, |ctrl| ctrl | DMA_ENABLE);
            let write = regs.get(Reg::TxWr) & OFFSET_MASK;
            let read = regs.get(Reg::TxRd) & OFFSET_MASK;
            let free = available_to_write(read, write, size) as usize;
            if free >= min {
                return false;
            }
            // The core stops at `TXWR`, so only the shortfall can be awaited
            regs.set(Reg::TxIrq, advance(read, (min - free) as u32, size));
            regs.set(Reg::Picr, Interrupt::TxPointer.into());
            // The core may have passed the new interrupt offset already
            let read = regs.get(Reg::TxRd) & OFFSET_MASK;
            if (available_to_write(read, write, size) as usize) < min {
                regs.modify(Reg::Imr, |imr| imr | u32::from(Interrupt::TxPointer));
                true
            } else {
                false
            }
        })?;
        if wait {
            self.suspend(&self.tx_signal, timeout)?;
        }
        Ok(())
    }

    /// Wait until the core has sent every queued frame.
    ///
    /// [`Channel::write`] is rejected while a flush is in progress.
    pub fn flush(&self) -> Result<(), Error> {
        self.link.check()?;
        if self.config.silent {
            return Err(Error::NotStarted);
        }
        let _claim = self.link.claim(Activity::Flush)?;
        let regs = self.regs();
        loop {
            let wait = self.link.commit(|_| {
                let write = regs.get(Reg::TxWr) & OFFSET_MASK;
                if write == regs.get(Reg::TxRd) & OFFSET_MASK {
                    return false;
                }
                regs.set(Reg::Picr, Interrupt::TxEmpty.into());
                if write != regs.get(Reg::TxRd) & OFFSET_MASK {
                    regs.modify(Reg::Imr, |imr| imr | u32::from(Interrupt::TxEmpty));
                    true
                } else {
                    false
                }
            })?;
            if !wait {
                return Ok(());
            }
            self.suspend(&self.tx_empty_signal, None)?;
        }
    }

    fn suspend(&self, signal: &D::Signal, timeout: Option<MillisDurationU32>) -> Result<(), Error> {
        if signal.wait(timeout).is_err() {
            log::debug!("wait timed out after {:?}", timeout);
            return Err(Error::Timeout);
        }
        self.link.check().map_err(|e| {
            log::debug!("wait aborted: {:?}", e);
            e
        })
    }

    /// Interrupt service routine of the core.
    ///
    /// Counts warnings, releases callers waiting for the pointer interrupts
    /// and halts the link on bus-off or AHB errors, waking every suspended
    /// caller.
    pub fn on_interrupt(&self) {
        let regs = self.regs();
        let serviced = critical_section::with(|cs| {
            let raw = regs.get(Reg::Pimsr);
            let raw_status = regs.get(Reg::Stat);
            if raw == 0 && raw_status == 0 {
                return Serviced::Spurious;
            }
            let state = self.link.cell(cs);
            if state.get() != LinkState::Started {
                regs.set(Reg::Picr, raw);
                return Serviced::Acknowledged;
            }
            let pending = InterruptSet::from(raw);
            let status = Status::from(raw_status);
            self.link.update_stats(cs, |s| {
                s.interrupts += 1;
                let warned = pending.intersects(InterruptSet::WARNINGS)
                    || status.passive()
                    || status.overrun();
                if !warned {
                    return;
                }
                if pending.pass() || status.passive() {
                    s.passive += 1;
                }
                if pending.or() || status.overrun() {
                    s.overrun += 1;
                }
                if pending.tx_loss() {
                    s.tx_loss += 1;
                }
                if pending.tx_sync() {
                    s.tx_sync += 1;
                }
                if pending.rx_sync() {
                    s.rx_sync += 1;
                }
            });

            let halted = if pending.off() || status.off() {
                Some(Halt::BusOff)
            } else if pending.intersects(InterruptSet::ERRORS) || status.ahb_error() {
                Some(Halt::AhbError)
            } else {
                None
            };
            if let Some(reason) = halted {
                state.set(LinkState::BusOff(reason));
                halt(regs);
                regs.set(Reg::Picr, IRQ_ALL);
                self.link.update_stats(cs, |s| match reason {
                    Halt::BusOff => s.bus_off += 1,
                    Halt::AhbError => s.ahb_errors += 1,
                });
                return Serviced::Halted(reason);
            }

            let wakeups = pending.intersection(InterruptSet::WAKEUPS);
            if wakeups.bits() != 0 {
                regs.modify(Reg::Imr, |imr| imr & !wakeups.bits());
            }
            regs.set(Reg::Picr, raw);
            Serviced::Progress(wakeups)
        });

        match serviced {
            Serviced::Spurious | Serviced::Acknowledged => {}
            Serviced::Halted(Halt::BusOff) => {
                log::debug!("bus-off, link halted");
                self.wake_all();
            }
            Serviced::Halted(Halt::AhbError) => {
                log::error!("AHB error, status {:?}", self.status());
                self.wake_all();
            }
            Serviced::Progress(wakeups) => {
                if wakeups.rx_irq() {
                    self.rx_signal.notify();
                }
                if wakeups.tx_irq() {
                    self.tx_signal.notify();
                }
                if wakeups.tx_empty() {
                    self.tx_empty_signal.notify();
                }
            }
        }
    }
}

impl<'a, Id: CanId, D: Dependencies<Id>, C: Capacities> Channel<'a, Id, D, C, Classic> {
    /// Compute the bit timing for `bitrate`, only while stopped
    pub fn set_speed(&mut self, bitrate: HertzU32) -> Result<(), ConfigurationError> {
        self.ensure_stopped().map_err(ConfigurationError::NotStopped)?;
        self.timing = compute_timing(
            bitrate,
            self.dependencies.core_clock(),
            DEFAULT_SAMPLE_POINT,
            &GRCAN_TIMING_RANGES,
        )?;
        Ok(())
    }

    /// Use the given timing register values, only while stopped
    pub fn set_raw_timing(&mut self, timing: Timing) -> Result<(), ConfigurationError> {
        self.ensure_stopped().map_err(ConfigurationError::NotStopped)?;
        timing.check(&GRCAN_TIMING_RANGES)?;
        self.timing = timing;
        Ok(())
    }

    /// Current timing register values
    pub fn timing(&self) -> Timing {
        self.timing
    }
}

impl<'a, Id: CanId, D: Dependencies<Id>, C: Capacities> Channel<'a, Id, D, C, Fd> {
    /// Compute the timing of both phases, only while stopped
    pub fn set_fd_speed(
        &mut self,
        nominal: HertzU32,
        data: HertzU32,
    ) -> Result<(), ConfigurationError> {
        self.ensure_stopped().map_err(ConfigurationError::NotStopped)?;
        let core_clock = self.dependencies.core_clock();
        let nominal = compute_timing(
            nominal,
            core_clock,
            DEFAULT_SAMPLE_POINT,
            &GRCANFD_NOMINAL_TIMING_RANGES,
        )?;
        let data = compute_timing(
            data,
            core_clock,
            DEFAULT_SAMPLE_POINT,
            &GRCANFD_DATA_TIMING_RANGES,
        )?;
        self.timing = nominal;
        self.data_timing = data;
        Ok(())
    }

    /// Use the given timing register values, only while stopped
    pub fn set_raw_fd_timing(
        &mut self,
        nominal: Timing,
        data: Timing,
    ) -> Result<(), ConfigurationError> {
        self.ensure_stopped().map_err(ConfigurationError::NotStopped)?;
        nominal.check(&GRCANFD_NOMINAL_TIMING_RANGES)?;
        data.check(&GRCANFD_DATA_TIMING_RANGES)?;
        self.timing = nominal;
        self.data_timing = data;
        Ok(())
    }

    /// Current nominal and data phase timing register values
    pub fn fd_timing(&self) -> (Timing, Timing) {
        (self.timing, self.data_timing)
    }
}

impl<'a, Id, D, C, F> embedded_can::nb::Can for Channel<'a, Id, D, C, F>
where
    Id: CanId,
    D: Dependencies<Id>,
    C: Capacities,
    F: FrameFormat,
    F::Frame: embedded_can::Frame,
{
    type Frame = F::Frame;
    type Error = Error;

    fn transmit(&mut self, frame: &Self::Frame) -> nb::Result<Option<Self::Frame>, Error> {
        self.try_write(core::slice::from_ref(frame)).map(|_| None)
    }

    fn receive(&mut self) -> nb::Result<Self::Frame, Error> {
        let mut frame = [F::Frame::default()];
        self.try_read(&mut frame)?;
        Ok(frame[0])
    }
}

/// Mask the interrupts and disable both DMA channels
fn halt<R: RegisterAccess + ?Sized>(regs: &R) {
    regs.set(Reg::Imr, 0);
    regs.set(Reg::RxCtrl, 0);
    regs.set(Reg::TxCtrl, 0);
}

fn sync_filter(filter: Option<Filter>) -> Filter {
    filter.unwrap_or(Filter {
        code: 0,
        mask: FILTER_DISABLED_MASK,
    })
}

/// Change a code/mask pair without matching anything unintended on the way
fn write_filter<R: RegisterAccess + ?Sized>(regs: &R, code: Reg, mask: Reg, filter: Filter) {
    regs.set(mask, FILTER_DISABLED_MASK);
    regs.set(code, filter.code);
    regs.set(mask, filter.mask);
}
