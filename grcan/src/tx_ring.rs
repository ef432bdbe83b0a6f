//! Queueing frames into the transmit ring

use crate::bus::Error;
use crate::message::{FrameFormat, InvalidLength, MAX_FRAME_SLOTS};
use crate::messageram::Descriptor;
use crate::reg::{AccessRegisters as _, Reg, DMA_ENABLE, OFFSET_MASK};
use crate::ring::{advance, available_to_write, Ring};
use crate::state::Link;
use core::marker::PhantomData;
use grcan_core::RegisterAccess;

/// Transmit side of a channel; software owns `TXWR`, the core owns `TXRD`.
pub(crate) struct TxRing<'a, F> {
    ring: Ring<'a>,
    _format: PhantomData<F>,
}

impl<'a, F: FrameFormat> TxRing<'a, F> {
    pub(crate) fn new(ring: Ring<'a>) -> Self {
        Self {
            ring,
            _format: PhantomData,
        }
    }

    pub(crate) fn ring(&self) -> &Ring<'a> {
        &self.ring
    }

    /// Slots that can be filled before reaching the core's read offset
    pub(crate) fn free<R: RegisterAccess + ?Sized>(&self, regs: &R) -> usize {
        let read = regs.get(Reg::TxRd) & OFFSET_MASK;
        let write = regs.get(Reg::TxWr) & OFFSET_MASK;
        available_to_write(read, write, self.ring.size()) as usize
    }

    /// Queue as many leading frames of `frames` as fit and hand them to the
    /// core.
    ///
    /// A frame is written only when all its slots fit; it and every frame
    /// after it stay with the caller otherwise. A frame with an invalid
    /// length ends the transfer, or fails it with [`Error::InvalidArgument`]
    /// if it is the first one.
    pub(crate) fn transmit<R: RegisterAccess + ?Sized>(
        &self,
        regs: &R,
        link: &Link,
        frames: &[F::Frame],
    ) -> Result<usize, Error> {
        let size = self.ring.size();
        let read = regs.get(Reg::TxRd) & OFFSET_MASK;
        let mut write = regs.get(Reg::TxWr) & OFFSET_MASK;
        let mut moved = 0;
        let mut slots = [Descriptor::default(); MAX_FRAME_SLOTS];

        for frame in frames {
            let n = match F::encode(frame, &mut slots) {
                Ok(n) => n,
                Err(InvalidLength(length)) if moved > 0 => {
                    log::debug!("stopping before frame of invalid length {}", length);
                    break;
                }
                Err(InvalidLength(length)) => {
                    log::warn!("rejecting frame of invalid length {}", length);
                    return Err(Error::InvalidArgument);
                }
            };
            if n > available_to_write(read, write, size) as usize {
                break;
            }
            self.ring.store(write, &slots[..n]);
            write = advance(write, n as u32, size);
            moved += 1;
        }

        link.commit(|_| {
            if moved > 0 {
                regs.set(Reg::TxWr, write);
                regs.set(Reg::TxCtrl, DMA_ENABLE);
            }
        })?;
        Ok(moved)
    }
}
