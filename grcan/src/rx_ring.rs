//! Copying received frames out of the receive ring

use crate::bus::Error;
use crate::message::{FrameFormat, MAX_FRAME_SLOTS};
use crate::messageram::Descriptor;
use crate::reg::{AccessRegisters as _, Reg, DMA_ENABLE, OFFSET_MASK};
use crate::ring::{advance, available_to_read, Ring};
use crate::state::Link;
use core::marker::PhantomData;
use grcan_core::RegisterAccess;

/// Receive side of a channel; the core owns `RXWR`, software owns `RXRD`.
pub(crate) struct RxRing<'a, F> {
    ring: Ring<'a>,
    _format: PhantomData<F>,
}

impl<'a, F: FrameFormat> RxRing<'a, F> {
    pub(crate) fn new(ring: Ring<'a>) -> Self {
        Self {
            ring,
            _format: PhantomData,
        }
    }

    pub(crate) fn ring(&self) -> &Ring<'a> {
        &self.ring
    }

    /// Slots filled by the core and not yet read
    pub(crate) fn available<R: RegisterAccess + ?Sized>(&self, regs: &R) -> usize {
        let read = regs.get(Reg::RxRd) & OFFSET_MASK;
        let write = regs.get(Reg::RxWr) & OFFSET_MASK;
        available_to_read(read, write, self.ring.size()) as usize
    }

    /// Copy up to `frames.len()` frames and hand their slots back to the core.
    ///
    /// A frame whose slots are not all published yet ends the transfer. A
    /// descriptor that does not decode ends the transfer before it when frames
    /// were already copied; otherwise it is dropped and reported as
    /// [`Error::InvalidFrame`].
    pub(crate) fn receive<R: RegisterAccess + ?Sized>(
        &self,
        regs: &R,
        link: &Link,
        frames: &mut [F::Frame],
    ) -> Result<usize, Error> {
        let size = self.ring.size();
        let start = regs.get(Reg::RxRd) & OFFSET_MASK;
        let write = regs.get(Reg::RxWr) & OFFSET_MASK;
        let mut read = start;
        let mut moved = 0;
        let mut invalid = false;
        let mut slots = [Descriptor::default(); MAX_FRAME_SLOTS];

        while moved < frames.len() {
            let available = available_to_read(read, write, size) as usize;
            if available == 0 {
                break;
            }
            self.ring.load(read, &mut slots[..1]);
            let n = F::received_slots(&slots[0]);
            if n > available {
                break;
            }
            self.ring.load(read, &mut slots[..n]);
            match F::decode(&slots[..n]) {
                Ok(frame) => frames[moved] = frame,
                Err(e) if moved > 0 => {
                    log::debug!("stopping before undecodable descriptor: {:?}", e);
                    break;
                }
                Err(e) => {
                    log::warn!("dropping undecodable descriptor at {:#x}: {:?}", read, e);
                    invalid = true;
                    read = advance(read, n as u32, size);
                    break;
                }
            }
            read = advance(read, n as u32, size);
            moved += 1;
        }

        link.commit(|cs| {
            if invalid {
                link.update_stats(cs, |s| s.invalid_frames += 1);
            }
            if read != start {
                regs.set(Reg::RxRd, read);
                regs.set(Reg::RxCtrl, DMA_ENABLE);
            }
        })?;

        if invalid {
            Err(Error::InvalidFrame)
        } else {
            Ok(moved)
        }
    }
}
