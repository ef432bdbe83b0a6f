//! Handling of frames and their ring descriptors
//!
//! Every frame starts with a header slot:
//!
//! | word | bits  | content                                       |
//! |------|-------|-----------------------------------------------|
//! | 0    | 31    | extended identifier                           |
//! | 0    | 30    | remote frame                                  |
//! | 0    | 28:0  | extended identifier, or standard in 28:18     |
//! | 1    | 31:28 | data length code                              |
//! | 2, 3 |       | first 8 data bytes                            |
//!
//! The two formats differ in the rest of word 1 and in whether the payload
//! continues into following slots, see [`classic`] and [`fd`].

pub mod classic;
pub mod fd;

pub use classic::{Classic, ClassicFrame, RxStatus};
pub use fd::{Fd, FdFrame, FdOptions};

use crate::messageram::Descriptor;
use embedded_can::{ExtendedId, Id, StandardId};

/// Largest number of slots a single frame occupies
pub const MAX_FRAME_SLOTS: usize = 5;

const HEAD0_EXTENDED: u32 = 1 << 31;
const HEAD0_REMOTE: u32 = 1 << 30;
const STANDARD_ID_SHIFT: u32 = 18;
const HEAD1_DLC_SHIFT: u32 = 28;

/// The frame length has no data length code in this format
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct InvalidLength(pub usize);

/// A received descriptor does not hold a frame of this format
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum InvalidDescriptor {
    /// The data length code has no meaning in this format
    DataLengthCode(u8),
    /// Fewer slots were provided than the header announces
    Truncated,
}

/// Descriptor layout of one frame format.
///
/// Implemented by [`Classic`] and [`Fd`]. The ring transfer and blocking I/O
/// logic is written once over this trait.
pub trait FrameFormat {
    /// Application-level frame
    type Frame: Copy + Default;
    /// `true` if the format needs a GRCANFD core
    const FD: bool;
    /// Longest payload in bytes
    const MAX_LENGTH: usize;

    /// Number of slots a frame of `length` data bytes occupies
    fn slots_for_length(length: usize) -> Result<usize, InvalidLength>;

    /// Number of slots `frame` occupies
    fn slots_for(frame: &Self::Frame) -> Result<usize, InvalidLength>;

    /// Write `frame` into the leading slots of `slots` and return how many
    /// were used. Nothing is written if the frame is rejected.
    ///
    /// `slots` must hold at least [`FrameFormat::slots_for`] descriptors.
    fn encode(frame: &Self::Frame, slots: &mut [Descriptor]) -> Result<usize, InvalidLength>;

    /// Number of slots occupied by the received frame starting with `head`
    fn received_slots(head: &Descriptor) -> usize;

    /// Read a frame from its slots
    fn decode(slots: &[Descriptor]) -> Result<Self::Frame, InvalidDescriptor>;
}

fn encode_head0(id: Id, remote: bool) -> u32 {
    let head = match id {
        Id::Standard(id) => u32::from(id.as_raw()) << STANDARD_ID_SHIFT,
        Id::Extended(id) => HEAD0_EXTENDED | id.as_raw(),
    };
    if remote {
        head | HEAD0_REMOTE
    } else {
        head
    }
}

fn decode_head0(head: u32) -> (Id, bool) {
    let id = if head & HEAD0_EXTENDED != 0 {
        // The mask ensures the ID is in range for a 29-bit integer
        Id::Extended(unsafe { ExtendedId::new_unchecked(head & ExtendedId::MAX.as_raw()) })
    } else {
        // The mask ensures the ID is in range for a 11-bit integer
        Id::Standard(unsafe {
            StandardId::new_unchecked((head >> STANDARD_ID_SHIFT) as u16 & StandardId::MAX.as_raw())
        })
    };
    (id, head & HEAD0_REMOTE != 0)
}

fn dlc_of(head: &Descriptor) -> u8 {
    (head.word(1) >> HEAD1_DLC_SHIFT) as u8
}
