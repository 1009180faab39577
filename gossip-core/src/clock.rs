//! Clock abstraction.
//!
//! The protocol state machine (`FailureDetector`, `PeerState`, `Gossiper`)
//! never reads the system clock directly. Everything that needs "now" or
//! "fire in N seconds" goes through a [`Clock`] / [`Scheduler`], so tests can
//! drive the 1 Hz heartbeat and gossip timers — and the Phi Accrual math that
//! depends on elapsed wall-clock time — deterministically, without sleeping.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Reports the current time, in fractional seconds, to the core state
/// machine. Implementations are free to choose any epoch; only deltas
/// between successive `now()` calls are meaningful.
pub trait Clock: Send + Sync {
    fn now(&self) -> f64;
}

/// A handle to a scheduled callback. Dropping it does not cancel the
/// callback — call [`TimerHandle::cancel`] explicitly, mirroring the
/// `call_later(...).cancel()` handles used throughout the original
/// Twisted-based implementation this protocol was distilled from.
pub struct TimerHandle {
    cancel: Box<dyn FnOnce() + Send>,
}

impl TimerHandle {
    fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        TimerHandle {
            cancel: Box::new(cancel),
        }
    }

    pub fn cancel(self) {
        (self.cancel)();
    }
}

/// A `Clock` that can also schedule work.
///
/// `call_later` models a one-shot timer (used by the leader-election
/// recipe's re-armable vote timeout). `call_every` models a periodic
/// `task.LoopingCall`-style timer (used by the Gossiper's heartbeat and
/// gossip ticks), with an `immediate` flag matching `LoopingCall.start(period,
/// now=True)`.
pub trait Scheduler: Clock {
    fn call_later(&self, delay: Duration, callback: Box<dyn FnOnce() + Send>) -> TimerHandle;

    fn call_every(
        &self,
        period: Duration,
        immediate: bool,
        callback: Arc<dyn Fn() + Send + Sync>,
    ) -> TimerHandle;
}

// ---------------------------------------------------------------------------
// Tokio-backed clock for production use.
// ---------------------------------------------------------------------------

/// Real-time [`Scheduler`] built on the Tokio runtime. Requires a Tokio
/// reactor to be running when timers are scheduled.
#[derive(Clone, Default)]
pub struct TokioClock;

impl TokioClock {
    pub fn new() -> Self {
        TokioClock
    }
}

impl Clock for TokioClock {
    fn now(&self) -> f64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs_f64()
    }
}

impl Scheduler for TokioClock {
    fn call_later(&self, delay: Duration, callback: Box<dyn FnOnce() + Send>) -> TimerHandle {
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            callback();
        });
        TimerHandle::new(move || handle.abort())
    }

    fn call_every(
        &self,
        period: Duration,
        immediate: bool,
        callback: Arc<dyn Fn() + Send + Sync>,
    ) -> TimerHandle {
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            if immediate {
                callback();
            }
            loop {
                ticker.tick().await;
                callback();
            }
        });
        TimerHandle::new(move || handle.abort())
    }
}

// ---------------------------------------------------------------------------
// Manual (virtual) clock for deterministic tests.
// ---------------------------------------------------------------------------

struct OneShot {
    id: u64,
    deadline: f64,
    callback: Mutex<Option<Box<dyn FnOnce() + Send>>>,
    cancelled: Arc<AtomicBool>,
}

struct Periodic {
    id: u64,
    period: f64,
    next_deadline: Mutex<f64>,
    callback: Arc<dyn Fn() + Send + Sync>,
    cancelled: Arc<AtomicBool>,
}

/// A virtual clock for tests. Time only advances when [`ManualClock::advance`]
/// is called; any one-shot or periodic callbacks whose deadline falls within
/// the advanced window fire in deadline order, including callbacks that
/// reschedule themselves (e.g. a periodic tick re-arming itself).
#[derive(Default)]
pub struct ManualClock {
    now: AtomicU64, // bits of an f64, see now()/set_now()
    next_id: AtomicU64,
    one_shots: Mutex<Vec<OneShot>>,
    periodics: Mutex<Vec<Periodic>>,
}

impl ManualClock {
    pub fn new() -> Arc<Self> {
        Arc::new(ManualClock {
            now: AtomicU64::new(0f64.to_bits()),
            next_id: AtomicU64::new(0),
            one_shots: Mutex::new(Vec::new()),
            periodics: Mutex::new(Vec::new()),
        })
    }

    fn now_f64(&self) -> f64 {
        f64::from_bits(self.now.load(Ordering::SeqCst))
    }

    fn set_now(&self, value: f64) {
        self.now.store(value.to_bits(), Ordering::SeqCst);
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Advance the clock by `delay`, firing every callback whose deadline
    /// falls at or before the new time, in deadline order. Periodic
    /// callbacks reschedule themselves for `deadline + period` as they fire.
    pub fn advance(&self, delay: Duration) {
        let target = self.now_f64() + delay.as_secs_f64();
        loop {
            let next_one_shot = self
                .one_shots
                .lock()
                .unwrap()
                .iter()
                .filter(|t| !t.cancelled.load(Ordering::SeqCst))
                .map(|t| t.deadline)
                .filter(|d| *d <= target)
                .fold(None, |acc: Option<f64>, d| {
                    Some(acc.map_or(d, |a| a.min(d)))
                });
            let next_periodic = self
                .periodics
                .lock()
                .unwrap()
                .iter()
                .filter(|p| !p.cancelled.load(Ordering::SeqCst))
                .map(|p| *p.next_deadline.lock().unwrap())
                .filter(|d| *d <= target)
                .fold(None, |acc: Option<f64>, d| {
                    Some(acc.map_or(d, |a| a.min(d)))
                });

            let next = match (next_one_shot, next_periodic) {
                (Some(a), Some(b)) => Some(a.min(b)),
                (Some(a), None) => Some(a),
                (None, Some(b)) => Some(b),
                (None, None) => None,
            };

            let Some(deadline) = next else {
                break;
            };
            self.set_now(deadline);

            let due_one_shot = {
                let mut guard = self.one_shots.lock().unwrap();
                let pos = guard.iter().position(|t| {
                    !t.cancelled.load(Ordering::SeqCst) && t.deadline == deadline
                });
                pos.map(|i| guard.remove(i))
            };
            if let Some(t) = due_one_shot {
                if let Some(cb) = t.callback.lock().unwrap().take() {
                    cb();
                }
                continue;
            }

            let due_periodic_id = {
                let guard = self.periodics.lock().unwrap();
                guard
                    .iter()
                    .find(|p| {
                        !p.cancelled.load(Ordering::SeqCst)
                            && *p.next_deadline.lock().unwrap() == deadline
                    })
                    .map(|p| p.id)
            };
            if let Some(id) = due_periodic_id {
                let (cb, period) = {
                    let guard = self.periodics.lock().unwrap();
                    let p = guard.iter().find(|p| p.id == id).unwrap();
                    (p.callback.clone(), p.period)
                };
                cb();
                let guard = self.periodics.lock().unwrap();
                if let Some(p) = guard.iter().find(|p| p.id == id) {
                    let mut next = p.next_deadline.lock().unwrap();
                    *next += period;
                }
            }
        }
        self.set_now(target);
    }

    /// Number of still-pending (not cancelled, not yet fired) timers.
    pub fn pending_count(&self) -> usize {
        let one_shots = self
            .one_shots
            .lock()
            .unwrap()
            .iter()
            .filter(|t| !t.cancelled.load(Ordering::SeqCst))
            .count();
        let periodics = self
            .periodics
            .lock()
            .unwrap()
            .iter()
            .filter(|p| !p.cancelled.load(Ordering::SeqCst))
            .count();
        one_shots + periodics
    }
}

impl Clock for ManualClock {
    fn now(&self) -> f64 {
        self.now_f64()
    }
}

impl Scheduler for ManualClock {
    fn call_later(&self, delay: Duration, callback: Box<dyn FnOnce() + Send>) -> TimerHandle {
        let id = self.next_id();
        let cancelled = Arc::new(AtomicBool::new(false));
        let deadline = self.now_f64() + delay.as_secs_f64();
        self.one_shots.lock().unwrap().push(OneShot {
            id,
            deadline,
            callback: Mutex::new(Some(callback)),
            cancelled: cancelled.clone(),
        });
        TimerHandle::new(move || cancelled.store(true, Ordering::SeqCst))
    }

    fn call_every(
        &self,
        period: Duration,
        immediate: bool,
        callback: Arc<dyn Fn() + Send + Sync>,
    ) -> TimerHandle {
        let id = self.next_id();
        let cancelled = Arc::new(AtomicBool::new(false));
        let first_deadline = if immediate {
            self.now_f64()
        } else {
            self.now_f64() + period.as_secs_f64()
        };
        self.periodics.lock().unwrap().push(Periodic {
            id,
            period: period.as_secs_f64(),
            next_deadline: Mutex::new(first_deadline),
            callback,
            cancelled: cancelled.clone(),
        });
        TimerHandle::new(move || cancelled.store(true, Ordering::SeqCst))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    #[test]
    fn one_shot_fires_at_deadline() {
        let clock = ManualClock::new();
        let fired = Arc::new(AtomicBool::new(false));
        let fired2 = fired.clone();
        clock.call_later(Duration::from_secs(5), Box::new(move || {
            fired2.store(true, Ordering::SeqCst);
        }));

        clock.advance(Duration::from_secs(4));
        assert!(!fired.load(Ordering::SeqCst));

        clock.advance(Duration::from_secs(1));
        assert!(fired.load(Ordering::SeqCst));
    }

    #[test]
    fn cancelled_one_shot_never_fires() {
        let clock = ManualClock::new();
        let fired = Arc::new(AtomicBool::new(false));
        let fired2 = fired.clone();
        let handle = clock.call_later(Duration::from_secs(1), Box::new(move || {
            fired2.store(true, Ordering::SeqCst);
        }));
        handle.cancel();
        clock.advance(Duration::from_secs(10));
        assert!(!fired.load(Ordering::SeqCst));
    }

    #[test]
    fn periodic_fires_immediately_and_repeats() {
        let clock = ManualClock::new();
        let count = Arc::new(AtomicU32::new(0));
        let count2 = count.clone();
        clock.call_every(
            Duration::from_secs(1),
            true,
            Arc::new(move || {
                count2.fetch_add(1, Ordering::SeqCst);
            }),
        );
        assert_eq!(count.load(Ordering::SeqCst), 0);
        clock.advance(Duration::from_millis(1));
        assert_eq!(count.load(Ordering::SeqCst), 1);
        clock.advance(Duration::from_secs(3));
        assert_eq!(count.load(Ordering::SeqCst), 4);
    }
}
