#![cfg_attr(not(feature = "std"), no_std)]
#![warn(missing_docs)]

//! `grcan-core` provides a set of essential abstractions that serve as a thin
//! integration layer between platform independent [`grcan`] crate and
//! platform specific HAL crates (in documentation also referred to as _target
//! HALs_).
//!
//! Traits from this crate are not supposed to be implemented by the
//! application developer; implementations should be provided by target HALs
//! (or by an RTOS port providing the [`Signal`] primitive).
//!
//! Integrators of this crate into any given target HAL are responsible for
//! soundness of trait implementations and conforming to their respective safety
//! prerequisites.
//!
//! [`grcan`]: <https://docs.rs/crate/grcan/>

pub use fugit;

use core::marker::PhantomData;
use fugit::{HertzU32, MillisDurationU32};

#[cfg(feature = "std")]
mod std_signal;
#[cfg(feature = "std")]
pub use std_signal::StdSignal;

/// Trait representing CAN peripheral identity
///
/// Types implementing this trait is expected to be used as a marker type that
/// serves the purpose of identifying specific instance of GRCAN core
/// available on the platform (as there might be more than one). It only conveys
/// *where* the APB register block is located, not necessarily that it can be
/// accessed. The latter is expressed by the [`Dependencies`] trait.
///
/// # Safety
/// `CanId::ADDRESS` points to the start of a valid GRCAN register block
///
/// # Examples
/// ```no_run
/// use grcan_core::CanId;
///
/// pub enum Can0 {}
///
/// unsafe impl CanId for Can0 {
///     const ADDRESS: *const () = 0x8000_0C00 as *const _;
/// }
/// ```
pub unsafe trait CanId {
    /// Static address of the register block of the corresponding GRCAN core
    const ADDRESS: *const ();
}

/// Single-word access to the GRCAN register block
///
/// `offset` is a byte offset from the start of the register block and is
/// always a multiple of 4.
pub trait RegisterAccess {
    /// Load the 32-bit register at `offset`
    fn read(&self, offset: usize) -> u32;
    /// Store `value` into the 32-bit register at `offset`
    fn write(&self, offset: usize, value: u32);
}

/// Volatile, memory-mapped [`RegisterAccess`] for the core identified by `Id`
pub struct Mmio<Id>(PhantomData<Id>);

impl<Id: CanId> Mmio<Id> {
    /// # Safety
    /// The caller must own the register block at `Id::ADDRESS`. Only a single
    /// owner may exist, usually the [`Dependencies`] implementation of the
    /// target HAL.
    pub const unsafe fn new() -> Self {
        Self(PhantomData)
    }

    fn register(offset: usize) -> *mut u32 {
        (Id::ADDRESS as *mut u8).wrapping_add(offset) as *mut u32
    }
}

impl<Id: CanId> RegisterAccess for Mmio<Id> {
    fn read(&self, offset: usize) -> u32 {
        // Safety: `Id::ADDRESS` points to a valid register block that `self`
        // owns.
        unsafe { core::ptr::read_volatile(Self::register(offset)) }
    }

    fn write(&self, offset: usize, value: u32) {
        // Safety: As above.
        unsafe { core::ptr::write_volatile(Self::register(offset), value) }
    }
}

/// A wait primitive timed out before being notified
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimedOut;

/// Wait/notify primitive used to suspend a caller until the interrupt handler
/// reports progress.
///
/// Semantics follow a binary semaphore extended with a latched broadcast:
/// - [`Signal::notify`] leaves a single token that satisfies the next
///   [`Signal::wait`]; multiple notifications do not accumulate
/// - [`Signal::notify_all`] releases every current and future waiter until
///   [`Signal::reset`] is called
///
/// `notify` and `notify_all` may be called from interrupt context.
pub trait Signal {
    /// Block until notified, or until `timeout` has elapsed
    fn wait(&self, timeout: Option<MillisDurationU32>) -> Result<(), TimedOut>;
    /// Release one waiter
    fn notify(&self);
    /// Release all waiters until the signal is reset
    fn notify_all(&self);
    /// Clear pending tokens and a latched broadcast
    fn reset(&self);
}

/// Trait representing CAN peripheral dependencies
///
/// Structs implementing [`Dependencies`] should
/// - enclose all object representable dependencies of [`CanId`] and release
///   them upon destruction
/// - be constructible only when it is safe and sound to interact with the
///   GRCAN core (respective clocks and pins have been already configured)
/// - be a singleton (only a single instance of [`Dependencies`] for a specific
///   [`CanId`] must exist at the same time)
///
/// in order to prevent aliasing and guarantee that high level abstractions
/// provided by [`grcan`] are sole owners of the peripheral.
///
/// # Safety
/// While [`Dependencies`] type instance exists
/// - the core clock must not change
/// - CAN related pins modes must not change
/// - the register block must not be safely accessible by application
///   developer and accessed in other parts of the target HAL
/// - [`Dependencies::dma_address`] must return an address through which the
///   GRCAN AHB master reaches the same memory as the CPU does at `address`
///
/// [`grcan`]: <https://docs.rs/crate/grcan/>
pub unsafe trait Dependencies<Id: CanId> {
    /// Register access used by the driver, typically [`Mmio<Id>`]
    type Registers: RegisterAccess;
    /// Wait primitive provided by the RTOS
    type Signal: Signal + Default;
    /// Access to the register block of the core
    fn registers(&self) -> &Self::Registers;
    /// Frequency of the clock driving the GRCAN core (AMBA bus clock).
    fn core_clock(&self) -> HertzU32;
    /// Translate a CPU address into the address the core uses for DMA.
    ///
    /// Returns `None` if the memory is not reachable by the core.
    fn dma_address(&self, address: *const ()) -> Option<u32>;
}
