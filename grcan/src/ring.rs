//! Circular DMA ring arithmetic
//!
//! Offsets are byte offsets into a ring of `size` bytes and are always a
//! multiple of [`SLOT_SIZE`]. One slot is always left unused so that
//! `read == write` only ever means "empty". Counts are in slots; for classic
//! frames a slot is a frame.

use crate::messageram::{Descriptor, SLOT_SIZE};
use vcell::VolatileCell;

const SLOT: u32 = SLOT_SIZE as u32;

/// Number of filled slots between `read` and `write`
pub fn available_to_read(read: u32, write: u32, size: u32) -> u32 {
    let used = if write >= read {
        write - read
    } else {
        size - (read - write)
    };
    used / SLOT
}

/// Number of slots that can be filled at `write` before reaching `read`
pub fn available_to_write(read: u32, write: u32, size: u32) -> u32 {
    let free = if read > write {
        read - write
    } else {
        size - (write - read)
    };
    (free / SLOT).saturating_sub(1)
}

/// Move `offset` forward by `slots`, wrapping at the end of the ring
pub fn advance(offset: u32, slots: u32, size: u32) -> u32 {
    (offset + slots * SLOT) % size
}

/// Typed view of a ring in the shared memory.
#[derive(Copy, Clone)]
pub(crate) struct Ring<'a> {
    slots: &'a [VolatileCell<Descriptor>],
}

impl<'a> Ring<'a> {
    pub(crate) fn new(slots: &'a [VolatileCell<Descriptor>]) -> Self {
        Self { slots }
    }

    /// Ring size in bytes, as programmed into the size register
    pub(crate) fn size(&self) -> u32 {
        (self.slots.len() * SLOT_SIZE) as u32
    }

    /// Number of slots
    pub(crate) fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub(crate) fn slots(&self) -> &'a [VolatileCell<Descriptor>] {
        self.slots
    }

    fn index(&self, offset: u32, slot: usize) -> usize {
        (offset as usize / SLOT_SIZE + slot) % self.slots.len()
    }

    /// Copy `out.len()` consecutive slots starting at `offset`
    pub(crate) fn load(&self, offset: u32, out: &mut [Descriptor]) {
        for (i, descriptor) in out.iter_mut().enumerate() {
            *descriptor = self.slots[self.index(offset, i)].get();
        }
    }

    /// Store consecutive slots starting at `offset`
    pub(crate) fn store(&self, offset: u32, descriptors: &[Descriptor]) {
        for (i, descriptor) in descriptors.iter().enumerate() {
            self.slots[self.index(offset, i)].set(*descriptor);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use proptest::prelude::*;

    const SIZE: u32 = 8 * SLOT;

    #[test]
    fn empty_ring() {
        for offset in (0..SIZE).step_by(SLOT_SIZE) {
            assert_eq!(available_to_read(offset, offset, SIZE), 0);
            assert_eq!(available_to_write(offset, offset, SIZE), 7);
        }
    }

    #[test]
    fn write_ahead_of_read() {
        assert_eq!(available_to_read(0, 5 * SLOT, SIZE), 5);
        assert_eq!(available_to_write(0, 5 * SLOT, SIZE), 2);
        assert_eq!(available_to_read(2 * SLOT, 3 * SLOT, SIZE), 1);
        assert_eq!(available_to_write(2 * SLOT, 3 * SLOT, SIZE), 6);
    }

    #[test]
    fn write_wrapped_behind_read() {
        assert_eq!(available_to_read(6 * SLOT, SLOT, SIZE), 3);
        assert_eq!(available_to_write(6 * SLOT, SLOT, SIZE), 4);
        assert_eq!(available_to_read(SLOT, 0, SIZE), 7);
        assert_eq!(available_to_write(SLOT, 0, SIZE), 0);
    }

    #[test]
    fn full_ring_keeps_one_slot() {
        assert_eq!(available_to_read(0, 7 * SLOT, SIZE), 7);
        assert_eq!(available_to_write(0, 7 * SLOT, SIZE), 0);
        assert_eq!(available_to_read(4 * SLOT, 3 * SLOT, SIZE), 7);
        assert_eq!(available_to_write(4 * SLOT, 3 * SLOT, SIZE), 0);
    }

    #[test]
    fn advance_wraps() {
        assert_eq!(advance(6 * SLOT, 1, SIZE), 7 * SLOT);
        assert_eq!(advance(6 * SLOT, 2, SIZE), 0);
        assert_eq!(advance(6 * SLOT, 5, SIZE), 3 * SLOT);
    }

    #[test]
    fn ring_view_wraps() {
        let cells: [VolatileCell<Descriptor>; 4] =
            core::array::from_fn(|_| VolatileCell::new(Descriptor::default()));
        let ring = Ring::new(&cells);
        let mut slots = [Descriptor::default(); 3];
        for (i, slot) in slots.iter_mut().enumerate() {
            slot.0[0] = i as u8 + 1;
        }
        ring.store(3 * SLOT, &slots);
        assert_eq!(cells[3].get().0[0], 1);
        assert_eq!(cells[0].get().0[0], 2);
        assert_eq!(cells[1].get().0[0], 3);

        let mut back = [Descriptor::default(); 3];
        ring.load(3 * SLOT, &mut back);
        assert_eq!(back, slots);
        assert_eq!(ring.size(), 64);
    }

    proptest! {
        #[test]
        fn read_and_write_cover_the_ring(
            slots in 2u32..256,
            read in 0u32..256,
            write in 0u32..256,
        ) {
            let size = slots * SLOT;
            let read = (read % slots) * SLOT;
            let write = (write % slots) * SLOT;
            let used = available_to_read(read, write, size);
            let free = available_to_write(read, write, size);
            prop_assert_eq!(used + free + 1, slots);
            prop_assert_eq!(used == 0, read == write);
        }

        #[test]
        fn advancing_write_moves_slots_between_counts(
            slots in 2u32..64,
            read in 0u32..64,
            fill in 0u32..64,
        ) {
            let size = slots * SLOT;
            let read = (read % slots) * SLOT;
            let fill = fill % slots;
            let write = advance(read, fill, size);
            prop_assert_eq!(available_to_read(read, write, size), fill);
            prop_assert_eq!(available_to_write(read, write, size), slots - 1 - fill);
        }
    }
}
