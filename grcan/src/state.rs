//! Link state shared by callers and the interrupt handler

use crate::bus::Error;
use core::cell::Cell;
use critical_section::{CriticalSection, Mutex};

/// Reason the controller halted the link
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Halt {
    /// Transmit error counter exceeded 255
    BusOff,
    /// A DMA access on the AHB bus failed
    AhbError,
}

/// Operational state of a channel
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum LinkState {
    /// Configuration may be changed; no transfers
    Stopped,
    /// Transfers are allowed
    Started,
    /// Stopped by the controller until restarted
    BusOff(Halt),
    /// The channel was closed; nothing but [`release`] is possible
    ///
    /// [`release`]: crate::bus::Channel::release
    Closed,
}

impl LinkState {
    /// Error a transfer reports in this state, `None` when transfers are
    /// allowed
    pub fn error(self) -> Option<Error> {
        match self {
            LinkState::Started => None,
            LinkState::Stopped => Some(Error::NotStarted),
            LinkState::BusOff(Halt::BusOff) => Some(Error::BusOff),
            LinkState::BusOff(Halt::AhbError) => Some(Error::AhbError),
            LinkState::Closed => Some(Error::Closed),
        }
    }
}

/// Interrupt and frame counters
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct Stats {
    /// Interrupts handled
    pub interrupts: u32,
    /// Error-passive indications
    pub passive: u32,
    /// Receive overruns
    pub overrun: u32,
    /// Sync messages received
    pub rx_sync: u32,
    /// Sync messages transmitted
    pub tx_sync: u32,
    /// Transmissions lost to arbitration or errors
    pub tx_loss: u32,
    /// AHB errors
    pub ahb_errors: u32,
    /// Bus-off events
    pub bus_off: u32,
    /// Receive descriptors dropped because they did not decode
    pub invalid_frames: u32,
}

/// Activities of which at most one may run at a time
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[repr(u8)]
pub(crate) enum Activity {
    Receive = 1 << 0,
    Transmit = 1 << 1,
    Flush = 1 << 2,
}

pub(crate) struct Link {
    state: Mutex<Cell<LinkState>>,
    stats: Mutex<Cell<Stats>>,
    activities: Mutex<Cell<u8>>,
}

impl Link {
    pub(crate) const fn new() -> Self {
        Self {
            state: Mutex::new(Cell::new(LinkState::Stopped)),
            stats: Mutex::new(Cell::new(Stats {
                interrupts: 0,
                passive: 0,
                overrun: 0,
                rx_sync: 0,
                tx_sync: 0,
                tx_loss: 0,
                ahb_errors: 0,
                bus_off: 0,
                invalid_frames: 0,
            })),
            activities: Mutex::new(Cell::new(0)),
        }
    }

    pub(crate) fn state(&self) -> LinkState {
        critical_section::with(|cs| self.state.borrow(cs).get())
    }

    pub(crate) fn cell<'cs>(&'cs self, cs: CriticalSection<'cs>) -> &'cs Cell<LinkState> {
        self.state.borrow(cs)
    }

    /// `Ok` if transfers are allowed
    pub(crate) fn check(&self) -> Result<(), Error> {
        self.state().error().map_or(Ok(()), Err)
    }

    /// Run `f` if the link is started, in the same critical section as the
    /// check. An interrupt that halts the link therefore either happens
    /// before the check or after `f` has written its registers.
    pub(crate) fn commit<T>(&self, f: impl FnOnce(CriticalSection<'_>) -> T) -> Result<T, Error> {
        critical_section::with(|cs| match self.state.borrow(cs).get().error() {
            None => Ok(f(cs)),
            Some(error) => Err(error),
        })
    }

    pub(crate) fn stats(&self) -> Stats {
        critical_section::with(|cs| self.stats.borrow(cs).get())
    }

    pub(crate) fn update_stats(&self, cs: CriticalSection<'_>, f: impl FnOnce(&mut Stats)) {
        let cell = self.stats.borrow(cs);
        let mut stats = cell.get();
        f(&mut stats);
        cell.set(stats);
    }

    pub(crate) fn clear_stats(&self) {
        critical_section::with(|cs| self.stats.borrow(cs).set(Stats::default()));
    }

    /// Mark `activity` as running until the returned guard is dropped
    pub(crate) fn claim(&self, activity: Activity) -> Result<Claim<'_>, Error> {
        critical_section::with(|cs| {
            let cell = self.activities.borrow(cs);
            if cell.get() & activity as u8 != 0 {
                return Err(Error::Busy);
            }
            cell.set(cell.get() | activity as u8);
            Ok(Claim {
                link: self,
                activity,
            })
        })
    }

    pub(crate) fn is_running(&self, activity: Activity) -> bool {
        critical_section::with(|cs| self.activities.borrow(cs).get() & activity as u8 != 0)
    }
}

pub(crate) struct Claim<'a> {
    link: &'a Link,
    activity: Activity,
}

impl Drop for Claim<'_> {
    fn drop(&mut self) {
        critical_section::with(|cs| {
            let cell = self.link.activities.borrow(cs);
            cell.set(cell.get() & !(self.activity as u8));
        });
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn state_to_error() {
        assert_eq!(LinkState::Started.error(), None);
        assert_eq!(LinkState::Stopped.error(), Some(Error::NotStarted));
        assert_eq!(LinkState::BusOff(Halt::BusOff).error(), Some(Error::BusOff));
        assert_eq!(
            LinkState::BusOff(Halt::AhbError).error(),
            Some(Error::AhbError)
        );
        assert_eq!(LinkState::Closed.error(), Some(Error::Closed));
    }

    #[test]
    fn commit_runs_only_when_started() {
        let link = Link::new();
        let mut ran = false;
        assert_eq!(link.commit(|_| ran = true), Err(Error::NotStarted));
        assert!(!ran);
        critical_section::with(|cs| link.cell(cs).set(LinkState::Started));
        assert_eq!(link.commit(|_| 7), Ok(7));
        critical_section::with(|cs| link.cell(cs).set(LinkState::BusOff(Halt::BusOff)));
        assert_eq!(link.commit(|_| ()), Err(Error::BusOff));
    }

    #[test]
    fn claims_are_exclusive_per_activity() {
        let link = Link::new();
        let rx = link.claim(Activity::Receive).unwrap();
        assert!(matches!(link.claim(Activity::Receive), Err(Error::Busy)));
        let tx = link.claim(Activity::Transmit).unwrap();
        assert!(link.is_running(Activity::Transmit));
        drop(rx);
        drop(tx);
        assert!(!link.is_running(Activity::Transmit));
        assert!(link.claim(Activity::Receive).is_ok());
    }

    #[test]
    fn stats_accumulate_until_cleared() {
        let link = Link::new();
        critical_section::with(|cs| {
            link.update_stats(cs, |s| s.interrupts += 2);
            link.update_stats(cs, |s| s.overrun += 1);
        });
        assert_eq!(link.stats().interrupts, 2);
        assert_eq!(link.stats().overrun, 1);
        link.clear_stats();
        assert_eq!(link.stats(), Stats::default());
    }
}
