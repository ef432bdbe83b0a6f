//! Interrupt sources of the GRCAN core
//!
//! The same bit layout is used by the `PIR`, `PIMSR`, `IMR` and `PICR`
//! registers. [`Channel::on_interrupt`] is the only consumer; the sets are
//! public so that applications can decode a raw register value.
//!
//! [`Channel::on_interrupt`]: crate::bus::Channel::on_interrupt

use bitfield::bitfield;

bitfield! {
    /// A set of GRCAN interrupts.
    #[derive(Copy, Clone, Default, PartialEq, Eq)]
    pub struct InterruptSet(u32);

    /// Transmission lost (arbitration or error)
    pub tx_loss, set_tx_loss: 16;
    /// Received message missed
    pub rx_miss, set_rx_miss: 15;
    /// Transmit error counter incremented
    pub tx_err, set_tx_err: 14;
    /// Receive error counter incremented
    pub rx_err, set_rx_err: 13;
    /// Sync message transmitted
    pub tx_sync, set_tx_sync: 12;
    /// Sync message received
    pub rx_sync, set_rx_sync: 11;
    /// Message transmitted
    pub tx, set_tx: 10;
    /// Message received
    pub rx, set_rx: 9;
    /// Transmit ring empty
    pub tx_empty, set_tx_empty: 8;
    /// Receive ring full
    pub rx_full, set_rx_full: 7;
    /// Transmit read offset reached `TXIRQ`
    pub tx_irq, set_tx_irq: 6;
    /// Receive write offset reached `RXIRQ`
    pub rx_irq, set_rx_irq: 5;
    /// AHB error during transmit DMA
    pub tx_ahb_err, set_tx_ahb_err: 4;
    /// AHB error during receive DMA
    pub rx_ahb_err, set_rx_ahb_err: 3;
    /// Overrun
    pub or, set_or: 2;
    /// Bus off
    pub off, set_off: 1;
    /// Error passive
    pub pass, set_pass: 0;
}

impl InterruptSet {
    /// Sources that take the link down
    pub const ERRORS: Self = Self(0x1a);
    /// Sources that are counted in the statistics
    pub const WARNINGS: Self = Self(0x1_1805);
    /// Pointer interrupts that release a waiting caller
    pub const WAKEUPS: Self = Self(0x160);

    /// The raw register value
    pub fn bits(&self) -> u32 {
        self.0
    }

    /// `true` if any interrupt in `other` is also in `self`
    pub fn intersects(&self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    /// The interrupts in both sets
    pub fn intersection(&self, other: Self) -> Self {
        Self(self.0 & other.0)
    }

    /// An iterator visiting all elements in ascending bit order.
    pub fn iter(&self) -> Iter {
        Iter {
            flags: *self,
            index: 0,
        }
    }
}

impl From<u32> for InterruptSet {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl From<Interrupt> for InterruptSet {
    fn from(value: Interrupt) -> Self {
        Self(value.into())
    }
}

impl FromIterator<Interrupt> for InterruptSet {
    fn from_iter<T: IntoIterator<Item = Interrupt>>(iter: T) -> Self {
        let mut set = 0_u32;
        for int in iter.into_iter() {
            set |= u32::from(int);
        }
        InterruptSet(set)
    }
}

impl core::fmt::Debug for InterruptSet {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "InterruptSet {{ ")?;
        for int in self.iter() {
            write!(f, "{} ", int.mnemonic())?;
        }
        write!(f, "}}")
    }
}

/// A single interrupt.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Interrupt {
    /// PASS
    ErrorPassive = 0,
    /// OFF
    BusOff = 1,
    /// OR
    Overrun = 2,
    /// RXAHBERR
    RxAhbError = 3,
    /// TXAHBERR
    TxAhbError = 4,
    /// RXIRQ
    RxPointer = 5,
    /// TXIRQ
    TxPointer = 6,
    /// RXFULL
    RxFull = 7,
    /// TXEMPTY
    TxEmpty = 8,
    /// RX
    Received = 9,
    /// TX
    Transmitted = 10,
    /// RXSYNC
    RxSync = 11,
    /// TXSYNC
    TxSync = 12,
    /// RXERRCNTR
    RxErrorCounter = 13,
    /// TXERRCNTR
    TxErrorCounter = 14,
    /// RXMISS
    RxMiss = 15,
    /// TXLOSS
    TxLoss = 16,
}

impl Interrupt {
    fn mnemonic(self) -> &'static str {
        use Interrupt::*;
        match self {
            ErrorPassive => "PASS",
            BusOff => "OFF",
            Overrun => "OR",
            RxAhbError => "RXAHBERR",
            TxAhbError => "TXAHBERR",
            RxPointer => "RXIRQ",
            TxPointer => "TXIRQ",
            RxFull => "RXFULL",
            TxEmpty => "TXEMPTY",
            Received => "RX",
            Transmitted => "TX",
            RxSync => "RXSYNC",
            TxSync => "TXSYNC",
            RxErrorCounter => "RXERRCNTR",
            TxErrorCounter => "TXERRCNTR",
            RxMiss => "RXMISS",
            TxLoss => "TXLOSS",
        }
    }
}

impl From<Interrupt> for u32 {
    fn from(x: Interrupt) -> Self {
        1 << x as u32
    }
}

/// The number does not name a GRCAN interrupt
#[derive(Debug)]
pub struct InvalidInterruptNumber;

impl TryFrom<u8> for Interrupt {
    type Error = InvalidInterruptNumber;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        use Interrupt::*;
        let ret = match value {
            0 => ErrorPassive,
            1 => BusOff,
            2 => Overrun,
            3 => RxAhbError,
            4 => TxAhbError,
            5 => RxPointer,
            6 => TxPointer,
            7 => RxFull,
            8 => TxEmpty,
            9 => Received,
            10 => Transmitted,
            11 => RxSync,
            12 => TxSync,
            13 => RxErrorCounter,
            14 => TxErrorCounter,
            15 => RxMiss,
            16 => TxLoss,
            17.. => Err(InvalidInterruptNumber)?,
        };
        Ok(ret)
    }
}

/// An iterator over the items of an [`InterruptSet`].
///
/// This `struct` is created by [`InterruptSet::iter`].
pub struct Iter {
    flags: InterruptSet,
    index: u8,
}

impl Iterator for Iter {
    type Item = Interrupt;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let i = self.index;
            self.index = self.index.saturating_add(1);
            // No gaps in the interrupt numbers, so this is `Some` until all
            // interrupts have been checked.
            let int = i.try_into().ok()?;
            if self.flags.0 & (1 << i) != 0 {
                return Some(int);
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn iter_preserves_length() {
        assert_eq!(InterruptSet(0).iter().count(), 0);
        assert_eq!(InterruptSet(1).iter().count(), 1);
        assert_eq!(InterruptSet(0x1_5555).iter().count(), 9);
        assert_eq!(InterruptSet(0x1_ffff).iter().count(), 17);
        assert_eq!(InterruptSet(0xffff_ffff).iter().count(), 17);
    }

    fn iter_collect(int: u32) -> u32 {
        InterruptSet::from_iter(InterruptSet(int).iter()).0
    }

    #[test]
    fn iter_collect_drops_reserved_bits() {
        assert_eq!(iter_collect(0x0_aaaa), 0x0_aaaa);
        assert_eq!(iter_collect(0xffff_ffff), 0x1_ffff);
    }

    #[test]
    fn groups_match_register_layout() {
        let errors: InterruptSet = [Interrupt::BusOff, Interrupt::RxAhbError, Interrupt::TxAhbError]
            .into_iter()
            .collect();
        assert_eq!(errors, InterruptSet::ERRORS);

        let wakeups: InterruptSet = [Interrupt::RxPointer, Interrupt::TxPointer, Interrupt::TxEmpty]
            .into_iter()
            .collect();
        assert_eq!(wakeups, InterruptSet::WAKEUPS);

        let warnings: InterruptSet = [
            Interrupt::ErrorPassive,
            Interrupt::Overrun,
            Interrupt::RxSync,
            Interrupt::TxSync,
            Interrupt::TxLoss,
        ]
        .into_iter()
        .collect();
        assert_eq!(warnings, InterruptSet::WARNINGS);
    }

    #[test]
    fn debug_lists_mnemonics() {
        let set = InterruptSet::from(Interrupt::BusOff);
        assert_eq!(format!("{:?}", set), "InterruptSet { OFF }");
    }
}
