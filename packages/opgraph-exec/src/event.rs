//! One-shot device events and their bindings to variables.
//!
//! Every cross-queue edge of the program graph is synchronized through a
//! [`DeviceEvent`] owned by the producing instruction. The producer records
//! it on its own queue once its work unit (and gc check) finished; each
//! consumer waits on it before starting. Events are generation-tagged: the
//! dispatcher resets them at the start of every invocation and a record or
//! wait carrying any other generation is rejected.

use crate::device::DeviceType;
use crate::error::{ExecError, Result};
use crate::ids::{InstrId, VarId};
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::trace;

#[derive(Debug, Default)]
struct EventState {
    generation: u64,
    signaled: bool,
}

/// Result of a wait that did not violate the generation protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Signaled,
    TimedOut,
}

#[derive(Debug)]
pub struct DeviceEvent {
    producer: InstrId,
    var: VarId,
    state: Mutex<EventState>,
    cond: Condvar,
}

impl DeviceEvent {
    pub fn new(producer: InstrId, var: VarId) -> Self {
        Self {
            producer,
            var,
            state: Mutex::new(EventState::default()),
            cond: Condvar::new(),
        }
    }

    /// The only instruction allowed to record this event
    pub fn producer(&self) -> InstrId {
        self.producer
    }

    pub fn var(&self) -> VarId {
        self.var
    }

    pub fn generation(&self) -> u64 {
        self.state.lock().generation
    }

    pub fn is_signaled(&self) -> bool {
        self.state.lock().signaled
    }

    /// Arm the event for a new invocation
    pub fn reset(&self, generation: u64) {
        let mut state = self.state.lock();
        state.generation = generation;
        state.signaled = false;
    }

    /// Signal all current and future waiters of `generation`
    pub fn record(&self, by: InstrId, generation: u64) -> Result<()> {
        if by != self.producer {
            return Err(ExecError::precondition(format!(
                "{} tried to record the event of {} on {}",
                by, self.producer, self.var
            )));
        }
        let mut state = self.state.lock();
        if state.generation != generation {
            return Err(ExecError::precondition(format!(
                "stale record of {} event: generation {} (current {})",
                self.var, generation, state.generation
            )));
        }
        state.signaled = true;
        drop(state);
        self.cond.notify_all();
        trace!(producer = %self.producer, var = %self.var, generation, "event recorded");
        Ok(())
    }

    /// Block the calling thread until the event of `generation` is recorded
    pub fn wait(&self, generation: u64, timeout: Option<Duration>) -> Result<WaitOutcome> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut state = self.state.lock();
        loop {
            if state.generation != generation {
                return Err(ExecError::precondition(format!(
                    "stale wait on {} event: generation {} (current {})",
                    self.var, generation, state.generation
                )));
            }
            if state.signaled {
                return Ok(WaitOutcome::Signaled);
            }
            match deadline {
                Some(deadline) => {
                    if self.cond.wait_until(&mut state, deadline).timed_out() && !state.signaled
                    {
                        return Ok(WaitOutcome::TimedOut);
                    }
                }
                None => self.cond.wait(&mut state),
            }
        }
    }
}

/// A variable's event together with the device type of the side that waits
#[derive(Debug, Clone)]
pub struct DeviceEventBinding {
    var: VarId,
    event: Arc<DeviceEvent>,
    waiter_type: DeviceType,
}

impl DeviceEventBinding {
    pub fn new(var: VarId, event: Arc<DeviceEvent>, waiter_type: DeviceType) -> Self {
        Self {
            var,
            event,
            waiter_type,
        }
    }

    pub fn var(&self) -> VarId {
        self.var
    }

    pub fn event(&self) -> &Arc<DeviceEvent> {
        &self.event
    }

    pub fn waiter_type(&self) -> DeviceType {
        self.waiter_type
    }

    /// Whether producer and waiter sides hold the same event
    pub fn shares_event_with(&self, other: &DeviceEventBinding) -> bool {
        Arc::ptr_eq(&self.event, &other.event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn event() -> Arc<DeviceEvent> {
        Arc::new(DeviceEvent::new(InstrId::new(1), VarId::new(0)))
    }

    #[test]
    fn test_record_then_wait() {
        let ev = event();
        ev.reset(1);
        ev.record(InstrId::new(1), 1).unwrap();
        assert!(ev.is_signaled());
        assert_eq!(ev.wait(1, None).unwrap(), WaitOutcome::Signaled);
    }

    #[test]
    fn test_wait_blocks_until_recorded() {
        let ev = event();
        ev.reset(3);
        let recorded = Arc::new(AtomicBool::new(false));

        let producer = {
            let ev = Arc::clone(&ev);
            let recorded = Arc::clone(&recorded);
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(20));
                recorded.store(true, Ordering::SeqCst);
                ev.record(InstrId::new(1), 3).unwrap();
            })
        };

        assert_eq!(ev.wait(3, None).unwrap(), WaitOutcome::Signaled);
        assert!(recorded.load(Ordering::SeqCst));
        producer.join().unwrap();
    }

    #[test]
    fn test_only_producer_may_record() {
        let ev = event();
        ev.reset(1);
        assert!(matches!(
            ev.record(InstrId::new(2), 1),
            Err(ExecError::PreconditionViolation(_))
        ));
        assert!(!ev.is_signaled());
    }

    #[test]
    fn test_stale_generation_rejected() {
        let ev = event();
        ev.reset(1);
        ev.record(InstrId::new(1), 1).unwrap();
        ev.reset(2);
        assert!(!ev.is_signaled());
        assert!(ev.record(InstrId::new(1), 1).is_err());
        assert!(ev.wait(1, None).is_err());
    }

    #[test]
    fn test_wait_timeout() {
        let ev = event();
        ev.reset(1);
        let outcome = ev.wait(1, Some(Duration::from_millis(10))).unwrap();
        assert_eq!(outcome, WaitOutcome::TimedOut);
    }

    #[test]
    fn test_binding_shares_event() {
        let ev = event();
        let producer_side = DeviceEventBinding::new(VarId::new(0), Arc::clone(&ev), DeviceType::Accelerator);
        let consumer_side = DeviceEventBinding::new(VarId::new(0), ev, DeviceType::Accelerator);
        assert!(producer_side.shares_event_with(&consumer_side));
        assert_eq!(consumer_side.waiter_type(), DeviceType::Accelerator);
    }
}
