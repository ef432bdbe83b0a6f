//! Memory management for the DMA rings shared between core and peripheral.
use core::mem::MaybeUninit;
use generic_array::{
    typenum::{consts::*, IsLessOrEqual, LeEq, Same},
    ArrayLength, GenericArray,
};
use vcell::VolatileCell;

/// Size of one ring slot in bytes
pub const SLOT_SIZE: usize = 16;

/// Alignment the core requires for the base address of a ring
pub const RING_ALIGNMENT: usize = 1024;

/// One ring slot in the core's representation.
///
/// The core reads and writes slots as four big-endian words. A classic frame
/// occupies one slot; an FD frame continues its payload in the following
/// slots.
#[repr(C, align(16))]
#[derive(Copy, Clone, Default, Debug, PartialEq, Eq)]
pub struct Descriptor(pub [u8; SLOT_SIZE]);

impl Descriptor {
    /// Header or data word `index` (0..4)
    pub fn word(&self, index: usize) -> u32 {
        let b = &self.0[index * 4..index * 4 + 4];
        u32::from_be_bytes([b[0], b[1], b[2], b[3]])
    }

    /// Set header or data word `index` (0..4)
    pub fn set_word(&mut self, index: usize, value: u32) {
        self.0[index * 4..index * 4 + 4].copy_from_slice(&value.to_be_bytes());
    }
}

/// Element capacities
pub trait Capacities {
    /// Number of slots in the receive ring
    ///
    /// Must be a multiple of 4, the granularity of the ring size register.
    type RxSlots: LimitedArrayLength<VolatileCell<Descriptor>, U65536>;
    /// Number of slots in the transmit ring
    ///
    /// Must be a multiple of 4, the granularity of the ring size register.
    type TxSlots: LimitedArrayLength<VolatileCell<Descriptor>, U65536>;
}

/// [`generic_array::ArrayLength`] with an upper bound.
pub trait LimitedArrayLength<T, MaxLength>: ArrayLength<T> {}
impl<T, N, MaxLength> LimitedArrayLength<T, MaxLength> for N
where
    N: ArrayLength<T> + IsLessOrEqual<MaxLength>,
    LeEq<N, MaxLength>: Same<True>,
{
}

#[repr(C, align(1024))]
pub(super) struct RingMemory<N: ArrayLength<VolatileCell<Descriptor>>>(
    pub(super) GenericArray<VolatileCell<Descriptor>, N>,
);

#[repr(C)]
pub(super) struct SharedMemoryInner<C: Capacities> {
    pub(super) tx: RingMemory<C::TxSlots>,
    pub(super) rx: RingMemory<C::RxSlots>,
}

/// Memory shared between the peripheral and core. Provide a struct `C` that
/// implements [`Capacities`] to select the sizes of the rings, then construct
/// this using `SharedMemory::<C>::new()`.
///
/// Both rings start on a [`RING_ALIGNMENT`] boundary.
pub struct SharedMemory<C: Capacities>(MaybeUninit<SharedMemoryInner<C>>);

impl<C: Capacities> SharedMemory<C> {
    pub(super) fn init(&mut self) -> &mut SharedMemoryInner<C> {
        self.0 = MaybeUninit::zeroed();
        // Safety: All bits 0 is a valid value for all the contained arrays.
        unsafe { self.0.assume_init_mut() }
    }

    /// All initialization is handled by the type that uses the memory, so this
    /// type can safely be assigned to a link_section that is not
    /// initialized by the system to control its position in memory.
    pub const fn new() -> Self {
        Self(MaybeUninit::uninit())
    }
}

impl<C: Capacities> Default for SharedMemory<C> {
    fn default() -> Self {
        Self::new()
    }
}
