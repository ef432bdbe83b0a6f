//! GRCAN / GRCANFD register map
//!
//! Only the registers of the first DMA channel are described; the driver
//! does not use the remaining channels.

use bitfield::bitfield;
use grcan_core::RegisterAccess;

/// Registers of a GRCAN core, by byte offset into the APB register block
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[repr(usize)]
pub enum Reg {
    /// Configuration
    Conf = 0x000,
    /// Status
    Stat = 0x004,
    /// Control
    Ctrl = 0x008,
    /// Capability (GRCANFD)
    Cap = 0x00c,
    /// Sync mask filter
    Smask = 0x018,
    /// Sync code filter
    Scode = 0x01c,
    /// Nominal bit timing (GRCANFD)
    Nbtr = 0x040,
    /// Data phase bit timing (GRCANFD)
    Fdbtr = 0x044,
    /// Pending interrupt masked status
    Pimsr = 0x100,
    /// Pending interrupt masked
    Pimr = 0x104,
    /// Pending interrupt status
    Pisr = 0x108,
    /// Pending interrupt
    Pir = 0x10c,
    /// Interrupt mask
    Imr = 0x110,
    /// Pending interrupt clear
    Picr = 0x114,
    /// Transmit channel control
    TxCtrl = 0x200,
    /// Transmit ring base address
    TxAddr = 0x204,
    /// Transmit ring size in bytes
    TxSize = 0x208,
    /// Transmit write offset, owned by software
    TxWr = 0x20c,
    /// Transmit read offset, owned by the core
    TxRd = 0x210,
    /// Transmit interrupt offset
    TxIrq = 0x214,
    /// Receive channel control
    RxCtrl = 0x300,
    /// Receive ring base address
    RxAddr = 0x304,
    /// Receive ring size in bytes
    RxSize = 0x308,
    /// Receive write offset, owned by the core
    RxWr = 0x30c,
    /// Receive read offset, owned by software
    RxRd = 0x310,
    /// Receive interrupt offset
    RxIrq = 0x314,
    /// Receive acceptance mask
    RxMask = 0x318,
    /// Receive acceptance code
    RxCode = 0x31c,
}

impl Reg {
    /// Byte offset into the register block
    pub const fn offset(self) -> usize {
        self as usize
    }
}

/// `CTRL`: reset the core
pub const CTRL_RESET: u32 = 1 << 1;
/// `CTRL`: enable the core
pub const CTRL_ENABLE: u32 = 1 << 0;

/// `TXCTRL`/`RXCTRL`: enable the DMA channel
pub const DMA_ENABLE: u32 = 1 << 0;

/// Bits of the `SIZE`, `WR`, `RD` and `IRQ` registers of a DMA channel
pub const OFFSET_MASK: u32 = 0x001f_fff0;

/// Interrupt sources unmasked while the channel runs: error counters, AHB
/// errors, overrun, bus-off, error-passive and tx-loss.
pub const IMR_DEFAULT: u32 = 0x1601f;
/// Every interrupt source
pub const IRQ_ALL: u32 = 0x1ffff;
/// Acceptance/sync mask that matches nothing
pub const FILTER_DISABLED_MASK: u32 = 0xffff_ffff;

bitfield! {
    /// `CONF` register
    ///
    /// The timing fields are only used by a GRCAN core; a GRCANFD core
    /// takes its timing from `NBTR` and `FDBTR`.
    #[derive(Copy, Clone, Default, PartialEq, Eq)]
    pub struct Conf(u32);
    impl Debug;
    /// Abort transmission on AHB error
    pub abort, set_abort: 0;
    /// Enable bus 0
    pub enable0, set_enable0: 1;
    /// Enable bus 1
    pub enable1, set_enable1: 2;
    /// Bus selection
    pub selection, set_selection: 3;
    /// Listen only
    pub silent, set_silent: 4;
    /// Baud rate prescaler (power of two)
    pub u8, bpr, set_bpr: 9, 8;
    /// Re-synchronisation jump width
    pub u8, rsj, set_rsj: 14, 12;
    /// Phase segment 2
    pub u8, ps2, set_ps2: 19, 16;
    /// Phase segment 1
    pub u8, ps1, set_ps1: 23, 20;
    /// Prescaler
    pub u8, scaler, set_scaler: 31, 24;
}

bitfield! {
    /// `STAT` register
    #[derive(Copy, Clone, Default, PartialEq, Eq)]
    pub struct Status(u32);
    impl Debug;
    /// Error passive
    pub passive, _: 0;
    /// Bus off
    pub off, _: 1;
    /// Overrun
    pub overrun, _: 2;
    /// AHB error
    pub ahb_error, _: 3;
    /// Transfer ongoing
    pub active, _: 4;
    /// Receive error counter
    pub u8, rx_error_count, _: 15, 8;
    /// Transmit error counter
    pub u8, tx_error_count, _: 23, 16;
}

impl Status {
    /// Conditions that halt the link
    pub fn is_fatal(&self) -> bool {
        self.off() || self.ahb_error()
    }

    /// Conditions that are only counted
    pub fn is_warning(&self) -> bool {
        self.overrun() || self.passive()
    }
}

impl From<u32> for Status {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

bitfield! {
    /// `NBTR` register (GRCANFD nominal bit timing)
    #[derive(Copy, Clone, Default, PartialEq, Eq)]
    pub struct NominalTiming(u32);
    impl Debug;
    /// Synchronisation jump width
    pub u8, sjw, set_sjw: 4, 0;
    /// Phase segment 2
    pub u8, ps2, set_ps2: 9, 5;
    /// Phase segment 1
    pub u8, ps1, set_ps1: 15, 10;
    /// Prescaler
    pub u8, scaler, set_scaler: 23, 16;
}

bitfield! {
    /// `FDBTR` register (GRCANFD data phase bit timing)
    #[derive(Copy, Clone, Default, PartialEq, Eq)]
    pub struct DataTiming(u32);
    impl Debug;
    /// Synchronisation jump width
    pub u8, sjw, set_sjw: 3, 0;
    /// Phase segment 2
    pub u8, ps2, set_ps2: 7, 4;
    /// Phase segment 1
    pub u8, ps1, set_ps1: 11, 8;
    /// Prescaler
    pub u8, scaler, set_scaler: 23, 16;
}

macro_rules! register_value {
    ($($register:ty),*) => {
        $(
            impl From<$register> for u32 {
                fn from(value: $register) -> u32 {
                    value.0
                }
            }
        )*
    };
}

register_value!(Conf, Status, NominalTiming, DataTiming);

/// Register access by name, implemented for every [`RegisterAccess`].
pub trait AccessRegisters {
    /// Read `reg`
    fn get(&self, reg: Reg) -> u32;
    /// Write `value` to `reg`
    fn set(&self, reg: Reg, value: u32);
    /// Read-modify-write `reg`
    fn modify(&self, reg: Reg, f: impl FnOnce(u32) -> u32) {
        let value = self.get(reg);
        self.set(reg, f(value));
    }
}

impl<R: RegisterAccess + ?Sized> AccessRegisters for R {
    fn get(&self, reg: Reg) -> u32 {
        self.read(reg.offset())
    }

    fn set(&self, reg: Reg, value: u32) {
        self.write(reg.offset(), value)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn conf_fields_land_on_register_bits() {
        let mut conf = Conf(0);
        conf.set_silent(true);
        conf.set_enable1(true);
        conf.set_bpr(3);
        conf.set_rsj(1);
        conf.set_ps2(4);
        conf.set_ps1(11);
        conf.set_scaler(0xa5);
        assert_eq!(conf.0, 0xa5b4_1314);
    }

    #[test]
    fn fd_timing_fields_land_on_register_bits() {
        let mut nbtr = NominalTiming(0);
        nbtr.set_scaler(4);
        nbtr.set_ps1(40);
        nbtr.set_ps2(12);
        nbtr.set_sjw(3);
        assert_eq!(nbtr.0, (4 << 16) | (40 << 10) | (12 << 5) | 3);

        let mut fdbtr = DataTiming(0);
        fdbtr.set_scaler(1);
        fdbtr.set_ps1(9);
        fdbtr.set_ps2(5);
        fdbtr.set_sjw(2);
        assert_eq!(fdbtr.0, (1 << 16) | (9 << 8) | (5 << 4) | 2);
    }

    #[test]
    fn status_classifies_errors() {
        assert!(Status(0x2).is_fatal());
        assert!(Status(0x8).is_fatal());
        assert!(!Status(0x5).is_fatal());
        assert!(Status(0x5).is_warning());
        assert_eq!(Status(0x0012_3400).tx_error_count(), 0x12);
        assert_eq!(Status(0x0012_3400).rx_error_count(), 0x34);
    }
}
