use crate::{Signal, TimedOut};
use fugit::MillisDurationU32;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

#[derive(Default)]
struct Flags {
    token: bool,
    broadcast: bool,
}

impl Flags {
    fn released(&self) -> bool {
        self.token || self.broadcast
    }
}

/// [`Signal`] for hosted targets, built on [`Mutex`] and [`Condvar`]
#[derive(Default)]
pub struct StdSignal {
    flags: Mutex<Flags>,
    cond: Condvar,
}

impl StdSignal {
    fn lock(&self) -> MutexGuard<'_, Flags> {
        self.flags.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Signal for StdSignal {
    fn wait(&self, timeout: Option<MillisDurationU32>) -> Result<(), TimedOut> {
        let guard = self.lock();
        let mut guard = match timeout {
            None => self
                .cond
                .wait_while(guard, |f| !f.released())
                .unwrap_or_else(PoisonError::into_inner),
            Some(timeout) => {
                let duration = Duration::from_millis(timeout.to_millis().into());
                let (guard, _) = self
                    .cond
                    .wait_timeout_while(guard, duration, |f| !f.released())
                    .unwrap_or_else(PoisonError::into_inner);
                if !guard.released() {
                    return Err(TimedOut);
                }
                guard
            }
        };
        guard.token = false;
        Ok(())
    }

    fn notify(&self) {
        self.lock().token = true;
        self.cond.notify_one();
    }

    fn notify_all(&self) {
        self.lock().broadcast = true;
        self.cond.notify_all();
    }

    fn reset(&self) {
        let mut flags = self.lock();
        flags.token = false;
        flags.broadcast = false;
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use fugit::ExtU32;

    #[test]
    fn token_is_consumed_by_one_wait() {
        let signal = StdSignal::default();
        signal.notify();
        signal.notify();
        assert_eq!(signal.wait(Some(1.millis())), Ok(()));
        assert_eq!(signal.wait(Some(1.millis())), Err(TimedOut));
    }

    #[test]
    fn broadcast_is_latched_until_reset() {
        let signal = StdSignal::default();
        signal.notify_all();
        assert_eq!(signal.wait(None), Ok(()));
        assert_eq!(signal.wait(None), Ok(()));
        signal.reset();
        assert_eq!(signal.wait(Some(1.millis())), Err(TimedOut));
    }

    #[test]
    fn wakes_blocked_thread() {
        let signal = StdSignal::default();
        std::thread::scope(|s| {
            let waiter = s.spawn(|| signal.wait(None));
            std::thread::sleep(Duration::from_millis(10));
            signal.notify();
            assert_eq!(waiter.join().ok(), Some(Ok(())));
        });
    }
}
