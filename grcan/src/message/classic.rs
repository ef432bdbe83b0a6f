//! Classic CAN frames, one 16-byte slot each.
//!
//! Besides the length code, word 1 of a received slot carries the
//! controller status at the time the frame was stored.

use super::*;
use embedded_can::Frame;

const HEAD1_OFF: u32 = 1 << 4;
const HEAD1_PASS: u32 = 1 << 3;
const HEAD1_OVERRUN: u32 = 1 << 0;
const HEAD1_TX_ERRORS_SHIFT: u32 = 16;
const HEAD1_RX_ERRORS_SHIFT: u32 = 8;

/// Marker type for the classic descriptor format
pub enum Classic {}

/// Controller status stored with a received frame.
///
/// These are diagnostics; the frame itself is valid.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct RxStatus {
    /// A frame was lost before this one
    pub overrun: bool,
    /// The controller was bus-off
    pub bus_off: bool,
    /// The controller was error-passive
    pub error_passive: bool,
    /// Transmit error counter
    pub tx_errors: u8,
    /// Receive error counter
    pub rx_errors: u8,
}

impl RxStatus {
    fn from_head1(head: u32) -> Self {
        Self {
            overrun: head & HEAD1_OVERRUN != 0,
            bus_off: head & HEAD1_OFF != 0,
            error_passive: head & HEAD1_PASS != 0,
            tx_errors: (head >> HEAD1_TX_ERRORS_SHIFT) as u8,
            rx_errors: (head >> HEAD1_RX_ERRORS_SHIFT) as u8,
        }
    }

    /// `true` if any of the status flags is set
    pub fn any(&self) -> bool {
        self.overrun || self.bus_off || self.error_passive
    }
}

/// A classic CAN frame with up to 8 data bytes.
///
/// Fields are public; frames with `len > 8` are rejected when written.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ClassicFrame {
    /// Identifier
    pub id: Id,
    /// Remote transmission request
    pub remote: bool,
    /// Data length, also the requested length of a remote frame
    pub len: u8,
    /// Data bytes, `len` of them are valid
    pub data: [u8; 8],
    /// Status reported with a received frame, ignored for transmission
    pub status: RxStatus,
}

impl Default for ClassicFrame {
    fn default() -> Self {
        Self {
            id: Id::Standard(StandardId::ZERO),
            remote: false,
            len: 0,
            data: [0; 8],
            status: RxStatus::default(),
        }
    }
}

impl Frame for ClassicFrame {
    fn new(id: impl Into<Id>, data: &[u8]) -> Option<Self> {
        if data.len() > 8 {
            return None;
        }
        let mut frame = Self {
            id: id.into(),
            len: data.len() as u8,
            ..Default::default()
        };
        frame.data[..data.len()].copy_from_slice(data);
        Some(frame)
    }

    fn new_remote(id: impl Into<Id>, dlc: usize) -> Option<Self> {
        if dlc > 8 {
            return None;
        }
        Some(Self {
            id: id.into(),
            remote: true,
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
        self.len.into()
    }

    fn data(&self) -> &[u8] {
        if self.remote {
            &[]
        } else {
            self.data.get(..usize::from(self.len)).unwrap_or(&self.data)
        }
    }
}

impl FrameFormat for Classic {
    type Frame = ClassicFrame;
    const FD: bool = false;
    const MAX_LENGTH: usize = 8;

    fn slots_for_length(length: usize) -> Result<usize, InvalidLength> {
        if length <= 8 {
            Ok(1)
        } else {
            Err(InvalidLength(length))
        }
    }

    fn slots_for(frame: &ClassicFrame) -> Result<usize, InvalidLength> {
        Self::slots_for_length(frame.len.into())
    }

    fn encode(frame: &ClassicFrame, slots: &mut [Descriptor]) -> Result<usize, InvalidLength> {
        let n = Self::slots_for(frame)?;
        let slot = &mut slots[0];
        *slot = Descriptor::default();
        slot.set_word(0, encode_head0(frame.id, frame.remote));
        slot.set_word(1, u32::from(frame.len) << HEAD1_DLC_SHIFT);
        slot.0[8..16].copy_from_slice(&frame.data);
        Ok(n)
    }

    fn received_slots(_head: &Descriptor) -> usize {
        1
    }

    fn decode(slots: &[Descriptor]) -> Result<ClassicFrame, InvalidDescriptor> {
        let slot = slots.first().ok_or(InvalidDescriptor::Truncated)?;
        let len = dlc_of(slot);
        if len > 8 {
            return Err(InvalidDescriptor::DataLengthCode(len));
        }
        let (id, remote) = decode_head0(slot.word(0));
        let mut data = [0; 8];
        data.copy_from_slice(&slot.0[8..16]);
        Ok(ClassicFrame {
            id,
            remote,
            len,
            data,
            status: RxStatus::from_head1(slot.word(1)),
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn frame(id: Id, data: &[u8]) -> ClassicFrame {
        ClassicFrame::new(id, data).unwrap()
    }

    #[test]
    fn round_trip_all_lengths() {
        let payload = [0xde, 0xad, 0xbe, 0xef, 0x01, 0x02, 0x03, 0x04];
        for len in 0..=8 {
            for id in [
                Id::Standard(StandardId::new(0x123).unwrap()),
                Id::Extended(ExtendedId::new(0x1abc_def0).unwrap()),
            ] {
                let f = frame(id, &payload[..len]);
                let mut slots = [Descriptor::default(); 1];
                assert_eq!(Classic::encode(&f, &mut slots), Ok(1));
                assert_eq!(Classic::decode(&slots), Ok(f));
            }
        }
    }

    #[test]
    fn remote_frame_keeps_requested_length() {
        let f = ClassicFrame::new_remote(StandardId::new(5).unwrap(), 4).unwrap();
        let mut slots = [Descriptor::default(); 1];
        Classic::encode(&f, &mut slots).unwrap();
        let back = Classic::decode(&slots).unwrap();
        assert!(back.is_remote_frame());
        assert_eq!(back.dlc(), 4);
        assert!(back.data().is_empty());
    }

    #[test]
    fn rejects_long_frames() {
        let f = ClassicFrame {
            len: 9,
            ..Default::default()
        };
        let mut slots = [Descriptor([0xaa; 16]); 1];
        assert_eq!(Classic::encode(&f, &mut slots), Err(InvalidLength(9)));
        assert_eq!(slots[0], Descriptor([0xaa; 16]));
        assert!(ClassicFrame::new(StandardId::ZERO, &[0; 9]).is_none());
    }

    #[test]
    fn status_bits_are_diagnostics() {
        let mut slot = Descriptor::default();
        slot.set_word(1, (3 << 28) | (0x12 << 16) | (0x34 << 8) | 0x19);
        let f = Classic::decode(&[slot]).unwrap();
        assert_eq!(f.len, 3);
        assert_eq!(
            f.status,
            RxStatus {
                overrun: true,
                bus_off: true,
                error_passive: true,
                tx_errors: 0x12,
                rx_errors: 0x34,
            }
        );
    }

    #[test]
    fn invalid_length_code_is_a_decode_error() {
        let mut slot = Descriptor::default();
        slot.set_word(1, 9 << 28);
        assert_eq!(
            Classic::decode(&[slot]),
            Err(InvalidDescriptor::DataLengthCode(9))
        );
    }
}
