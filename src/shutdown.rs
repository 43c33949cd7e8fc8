use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

const WAIT_SLICE: Duration = Duration::from_millis(100);

/// Process-wide cooperative stop signal.
///
/// Set from the signal handler, observed by the control loop once per tick
/// and by interruptible waits.
#[derive(Clone, Debug, Default)]
pub struct ShutdownFlag(Arc<AtomicBool>);

impl ShutdownFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_triggered(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Sleeps for `duration` in short slices, returning early once triggered.
    /// Returns true when the full duration elapsed. A duration past the end
    /// of the clock waits for the trigger alone.
    pub fn wait(&self, duration: Duration) -> bool {
        let deadline = Instant::now().checked_add(duration);
        loop {
            if self.is_triggered() {
                return false;
            }
            let slice = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return true;
                    }
                    WAIT_SLICE.min(deadline - now)
                }
                None => WAIT_SLICE,
            };
            std::thread::sleep(slice);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wait_runs_to_completion_when_untriggered() {
        let flag = ShutdownFlag::new();
        let start = Instant::now();
        assert!(flag.wait(Duration::from_millis(30)));
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn wait_returns_early_once_triggered() {
        let flag = ShutdownFlag::new();
        let remote = flag.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            remote.trigger();
        });
        let start = Instant::now();
        assert!(!flag.wait(Duration::from_secs(30)));
        assert!(start.elapsed() < Duration::from_secs(5));
        handle.join().expect("trigger thread");
    }

    #[test]
    fn unbounded_wait_still_observes_trigger() {
        let flag = ShutdownFlag::new();
        let remote = flag.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            remote.trigger();
        });
        assert!(!flag.wait(Duration::MAX));
        handle.join().expect("trigger thread");
    }
}
