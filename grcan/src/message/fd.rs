//! CAN FD frames, spanning 1 to 5 slots.
//!
//! The header slot holds the first 8 data bytes; the payload continues
//! through the following slots, 16 bytes each, wrapping at the end of the
//! ring like any other slot.

use super::*;
use bitfield::bitfield;
use embedded_can::Frame;

const HEAD1_OPTIONS_SHIFT: u32 = 25;

bitfield! {
    /// FD-specific frame options
    #[derive(Copy, Clone, Default, PartialEq, Eq)]
    pub struct FdOptions(u8);
    impl Debug;
    /// Transmit the data phase with the data bit rate
    pub bit_rate_switch, set_bit_rate_switch: 0;
    /// CAN FD frame format; classic format otherwise
    pub fd_format, set_fd_format: 1;
}

impl FdOptions {
    /// Classic frame format
    pub const CLASSIC: Self = Self(0);
    /// FD frame format without bit rate switching
    pub const FD: Self = Self(0b10);
    /// FD frame format with bit rate switching
    pub const FD_BRS: Self = Self(0b11);
}

/// Data length in bytes for every data length code
const DLC_TO_LENGTH: [u8; 16] = [0, 1, 2, 3, 4, 5, 6, 7, 8, 12, 16, 20, 24, 32, 48, 64];

/// Data length code for lengths 12, 16, ..., 64
const FD_LENGTH_TO_DLC: [Option<u8>; 14] = [
    Some(9),  // 12
    Some(10), // 16
    Some(11), // 20
    Some(12), // 24
    None,     // 28
    Some(13), // 32
    None,     // 36
    None,     // 40
    None,     // 44
    Some(14), // 48
    None,     // 52
    None,     // 56
    None,     // 60
    Some(15), // 64
];

/// Converts a data length in bytes to its data length code
pub fn length_to_dlc(length: usize) -> Result<u8, InvalidLength> {
    match length {
        0..=8 => Ok(length as u8),
        12..=64 if length % 4 == 0 => {
            FD_LENGTH_TO_DLC[(length - 12) / 4].ok_or(InvalidLength(length))
        }
        _ => Err(InvalidLength(length)),
    }
}

/// Converts a data length code to a length in bytes
pub fn dlc_to_length(dlc: u8) -> usize {
    DLC_TO_LENGTH[usize::from(dlc & 0xf)].into()
}

fn options_of(head: &Descriptor) -> FdOptions {
    FdOptions((head.word(1) >> HEAD1_OPTIONS_SHIFT) as u8 & 0b11)
}

fn slots_for_valid_length(length: usize) -> usize {
    1 + (length + 7) / 16
}

/// Marker type for the FD descriptor format
pub enum Fd {}

/// A CAN FD frame with up to 64 data bytes.
///
/// Fields are public; lengths without a data length code, and classic-format
/// frames longer than 8 bytes, are rejected when written.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct FdFrame {
    /// Identifier
    pub id: Id,
    /// Remote transmission request
    pub remote: bool,
    /// Frame format and bit rate switching
    pub options: FdOptions,
    /// Data length
    pub len: u8,
    /// Data bytes, `len` of them are valid
    pub data: [u8; 64],
}

impl Default for FdFrame {
    fn default() -> Self {
        Self {
            id: Id::Standard(StandardId::ZERO),
            remote: false,
            options: FdOptions::FD,
            len: 0,
            data: [0; 64],
        }
    }
}

impl FdFrame {
    /// Create a data frame with the given options.
    ///
    /// Returns `None` if `data` has a length without a data length code in
    /// the selected frame format.
    pub fn with_options(id: impl Into<Id>, data: &[u8], options: FdOptions) -> Option<Self> {
        let mut frame = Self {
            id: id.into(),
            options,
            len: u8::try_from(data.len()).ok()?,
            ..Default::default()
        };
        Fd::slots_for(&frame).ok()?;
        frame.data[..data.len()].copy_from_slice(data);
        Some(frame)
    }
}

impl Frame for FdFrame {
    /// Frames of up to 8 bytes use the classic format, longer frames the FD
    /// format without bit rate switching.
    fn new(id: impl Into<Id>, data: &[u8]) -> Option<Self> {
        let options = if data.len() > 8 {
            FdOptions::FD
        } else {
            FdOptions::CLASSIC
        };
        Self::with_options(id, data, options)
    }

    fn new_remote(id: impl Into<Id>, dlc: usize) -> Option<Self> {
        if dlc > 8 {
            return None;
        }
        Some(Self {
            id: id.into(),
            remote: true,
            options: FdOptions::CLASSIC,
            len: dlc as u8,
            ..Default::default()
        })
    }

    fn is_extended(&self) -> bool {
        matches!(self.id, Id::Extended(_))
    }

    fn is_remote_frame(&self) -> bool {
        self.remote
    }

    fn id(&self) -> Id {
        self.id
    }

    fn dlc(&self) -> usize {
        length_to_dlc(self.len.into()).map_or(0, usize::from)
    }

    fn data(&self) -> &[u8] {
        if self.remote {
            &[]
        } else {
            self.data.get(..usize::from(self.len)).unwrap_or(&self.data)
        }
    }
}

impl FrameFormat for Fd {
    type Frame = FdFrame;
    const FD: bool = true;
    const MAX_LENGTH: usize = 64;

    fn slots_for_length(length: usize) -> Result<usize, InvalidLength> {
        length_to_dlc(length)?;
        Ok(slots_for_valid_length(length))
    }

    fn slots_for(frame: &FdFrame) -> Result<usize, InvalidLength> {
        let length = usize::from(frame.len);
        if !frame.options.fd_format() && length > 8 {
            return Err(InvalidLength(length));
        }
        Self::slots_for_length(length)
    }

    fn encode(frame: &FdFrame, slots: &mut [Descriptor]) -> Result<usize, InvalidLength> {
        let n = Self::slots_for(frame)?;
        let length = usize::from(frame.len);
        let dlc = length_to_dlc(length)?;
        let slots = &mut slots[..n];
        slots.fill(Descriptor::default());
        slots[0].set_word(0, encode_head0(frame.id, frame.remote));
        slots[0].set_word(
            1,
            (u32::from(dlc) << HEAD1_DLC_SHIFT)
                | (u32::from(frame.options.0 & 0b11) << HEAD1_OPTIONS_SHIFT),
        );
        let (head, tail) = frame.data[..length].split_at(length.min(8));
        slots[0].0[8..8 + head.len()].copy_from_slice(head);
        for (slot, chunk) in slots[1..].iter_mut().zip(tail.chunks(16)) {
            slot.0[..chunk.len()].copy_from_slice(chunk);
        }
        Ok(n)
    }

    fn received_slots(head: &Descriptor) -> usize {
        if options_of(head).fd_format() {
            slots_for_valid_length(dlc_to_length(dlc_of(head)))
        } else {
            1
        }
    }

    fn decode(slots: &[Descriptor]) -> Result<FdFrame, InvalidDescriptor> {
        let head = slots.first().ok_or(InvalidDescriptor::Truncated)?;
        let options = options_of(head);
        let dlc = dlc_of(head);
        // A classic format frame carries at most 8 bytes
        if !options.fd_format() && dlc > 8 {
            return Err(InvalidDescriptor::DataLengthCode(dlc));
        }
        let n = Self::received_slots(head);
        if slots.len() < n {
            return Err(InvalidDescriptor::Truncated);
        }
        let length = dlc_to_length(dlc);
        let (id, remote) = decode_head0(head.word(0));
        let mut frame = FdFrame {
            id,
            remote,
            options,
            len: length as u8,
            data: [0; 64],
        };
        let (first, rest) = frame.data[..length].split_at_mut(length.min(8));
        first.copy_from_slice(&head.0[8..8 + first.len()]);
        for (chunk, slot) in rest.chunks_mut(16).zip(&slots[1..n]) {
            chunk.copy_from_slice(&slot.0[..chunk.len()]);
        }
        Ok(frame)
    }
}
