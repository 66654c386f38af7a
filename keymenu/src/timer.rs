//! Software timers driven by a periodic tick.
//!
//! A fixed pool of slots is ticked from interrupt context (a dedicated thread on the host). Start
//! callbacks run synchronously in the caller, expiry callbacks run in the tick context and must be
//! short: raise an event flag, store an atomic, start another timer.

use std::cell::RefCell;
use std::fmt::{Debug, Formatter};
use std::sync::Arc;
use critical_section::Mutex;
use log::{debug, trace};
use thiserror::Error;

/// Number of timer slots in the pool.
pub const TIMER_POOL_SIZE: usize = 16;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct TimerId(usize);

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum TimerMode {
    /// Disarms itself after expiring once.
    OneShot,
    /// Reloads its ticks and keeps expiring until stopped.
    Periodic,
}

#[derive(Debug, Error, Eq, PartialEq, Clone)]
pub enum TimerError {
    #[error("all {0} timer slots are in use")]
    PoolExhausted(usize),
    #[error("unknown timer {0:?}")]
    UnknownTimer(TimerId),
}

pub type TimerCallback = Arc<dyn Fn(TimerId) + Send + Sync>;

/// Everything a slot needs, fixed when it is registered.
pub struct TimerConfig {
    mode: TimerMode,
    on_start: Option<TimerCallback>,
    on_expire: Option<TimerCallback>,
}

impl TimerConfig {
    pub fn one_shot() -> Self {
        TimerConfig { mode: TimerMode::OneShot, on_start: None, on_expire: None }
    }

    pub fn periodic() -> Self {
        TimerConfig { mode: TimerMode::Periodic, on_start: None, on_expire: None }
    }

    /// Called synchronously by [TimerService::start], before the slot is armed.
    pub fn on_start(mut self, callback: impl Fn(TimerId) + Send + Sync + 'static) -> Self {
        self.on_start = Some(Arc::new(callback));
        self
    }

    /// Called from the tick context every time the slot expires.
    pub fn on_expire(mut self, callback: impl Fn(TimerId) + Send + Sync + 'static) -> Self {
        self.on_expire = Some(Arc::new(callback));
        self
    }
}

struct TimerSlot {
    mode: TimerMode,
    countdown: u32,
    reload: u32,
    enabled: bool,
    on_start: Option<TimerCallback>,
    on_expire: Option<TimerCallback>,
}

impl Debug for TimerSlot {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimerSlot")
            .field("mode", &self.mode)
            .field("countdown", &self.countdown)
            .field("reload", &self.reload)
            .field("enabled", &self.enabled)
            .finish()
    }
}

/// The timer pool.
///
/// Slots are never freed: a slot is registered once and then started and stopped for the lifetime
/// of the process.
pub struct TimerService {
    slots: Mutex<RefCell<heapless::Vec<TimerSlot, TIMER_POOL_SIZE>>>,
}

impl Debug for TimerService {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let used = critical_section::with(|cs| self.slots.borrow_ref(cs).len());
        write!(f, "TimerService({}/{} slots)", used, TIMER_POOL_SIZE)
    }
}

impl Default for TimerService {
    fn default() -> Self {
        Self::new()
    }
}

impl TimerService {
    pub const fn new() -> Self {
        TimerService {
            slots: Mutex::new(RefCell::new(heapless::Vec::new())),
        }
    }

    /// Registers a disarmed slot.
    ///
    /// # Errors
    /// - `TimerError::PoolExhausted` when every slot is taken. Timers are registered at start-up,
    ///   so this is a configuration error.
    pub fn initialize(&self, config: TimerConfig) -> Result<TimerId, TimerError> {
        let mode = config.mode;
        let id = critical_section::with(|cs| {
            let mut slots = self.slots.borrow_ref_mut(cs);
            let id = TimerId(slots.len());
            slots
                .push(TimerSlot {
                    mode: config.mode,
                    countdown: 0,
                    reload: 0,
                    enabled: false,
                    on_start: config.on_start,
                    on_expire: config.on_expire,
                })
                .map(|_| id)
                .map_err(|_| TimerError::PoolExhausted(TIMER_POOL_SIZE))
        })?;
        debug!("Registered {:?} timer {:?}.", mode, id);
        Ok(id)
    }

    /// Arms a slot to expire after `ticks` ticks, restarting it if it is already running.
    ///
    /// The slot's start callback runs first. A zero tick count expires on the next tick.
    pub fn start(&self, id: TimerId, ticks: u32) -> Result<(), TimerError> {
        let on_start = critical_section::with(|cs| {
            self.slots
                .borrow_ref(cs)
                .get(id.0)
                .map(|slot| slot.on_start.clone())
                .ok_or(TimerError::UnknownTimer(id))
        })?;

        if let Some(callback) = on_start {
            callback(id);
        }

        critical_section::with(|cs| {
            let mut slots = self.slots.borrow_ref_mut(cs);
            let slot = slots.get_mut(id.0).ok_or(TimerError::UnknownTimer(id))?;
            slot.countdown = ticks.max(1);
            slot.reload = ticks.max(1);
            slot.enabled = true;
            Ok(())
        })?;
        trace!("Started timer {:?} for {} ticks.", id, ticks);
        Ok(())
    }

    /// Disarms a slot. Stopping a disarmed slot does nothing.
    pub fn stop(&self, id: TimerId) -> Result<(), TimerError> {
        critical_section::with(|cs| {
            let mut slots = self.slots.borrow_ref_mut(cs);
            let slot = slots.get_mut(id.0).ok_or(TimerError::UnknownTimer(id))?;
            slot.enabled = false;
            Ok(())
        })
    }

    /// Whether the slot is counting down.
    pub fn is_armed(&self, id: TimerId) -> bool {
        critical_section::with(|cs| {
            self.slots
                .borrow_ref(cs)
                .get(id.0)
                .is_some_and(|slot| slot.enabled)
        })
    }

    /// Advances every armed slot by one tick and runs the expiry callbacks of those that ran out.
    ///
    /// Called from the tick interrupt. Callbacks run after the pool is released, so they may start
    /// or stop timers themselves.
    pub fn tick(&self) {
        let mut expired: heapless::Vec<(TimerId, TimerCallback), TIMER_POOL_SIZE> = heapless::Vec::new();

        critical_section::with(|cs| {
            let mut slots = self.slots.borrow_ref_mut(cs);
            for (index, slot) in slots.iter_mut().enumerate() {
                if !slot.enabled {
                    continue;
                }
                slot.countdown -= 1;
                if slot.countdown > 0 {
                    continue;
                }
                match slot.mode {
                    TimerMode::OneShot => slot.enabled = false,
                    TimerMode::Periodic => slot.countdown = slot.reload,
                }
                if let Some(callback) = &slot.on_expire {
                    // Capacity matches the pool, so this cannot overflow
                    let _ = expired.push((TimerId(index), callback.clone()));
                }
            }
        });

        for (id, callback) in expired {
            callback(id);
        }
    }

    /// Blocks until the slot has expired `ticks` ticks from now.
    ///
    /// Used for bus-level delays where nothing else may run in the meantime. Returns at the latest
    /// after `ticks` tick periods, provided the tick source is running. Zero ticks return at once.
    pub fn block_for(&self, id: TimerId, ticks: u32) -> Result<(), TimerError> {
        if ticks == 0 {
            return Ok(());
        }
        self.start(id, ticks)?;
        while self.is_armed(id) {
            std::hint::spin_loop();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    fn counter() -> (Arc<AtomicUsize>, impl Fn(TimerId) + Send + Sync + 'static) {
        let count = Arc::new(AtomicUsize::new(0));
        let handle = count.clone();
        (count, move |_| {
            handle.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn one_shot_expires_once() {
        let timers = TimerService::new();
        let (fired, on_expire) = counter();
        let id = timers.initialize(TimerConfig::one_shot().on_expire(on_expire)).expect("timer");

        timers.start(id, 3).expect("start");
        timers.tick();
        timers.tick();
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        timers.tick();
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(!timers.is_armed(id));

        for _ in 0..10 {
            timers.tick();
        }
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn periodic_reloads_until_stopped() {
        let timers = TimerService::new();
        let (fired, on_expire) = counter();
        let id = timers.initialize(TimerConfig::periodic().on_expire(on_expire)).expect("timer");

        timers.start(id, 2).expect("start");
        for _ in 0..6 {
            timers.tick();
        }
        assert_eq!(fired.load(Ordering::SeqCst), 3);
        assert!(timers.is_armed(id));

        timers.stop(id).expect("stop");
        timers.tick();
        timers.tick();
        assert_eq!(fired.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn start_callback_runs_before_arming() {
        let timers = Arc::new(TimerService::new());
        let armed_during_start = Arc::new(AtomicBool::new(true));
        let (flag, service) = (armed_during_start.clone(), timers.clone());
        let id = timers
            .initialize(TimerConfig::one_shot().on_start(move |id| {
                flag.store(service.is_armed(id), Ordering::SeqCst);
            }))
            .expect("timer");

        timers.start(id, 5).expect("start");
        assert!(!armed_during_start.load(Ordering::SeqCst));
        assert!(timers.is_armed(id));
    }

    #[test]
    fn restart_replaces_countdown() {
        let timers = TimerService::new();
        let (fired, on_expire) = counter();
        let id = timers.initialize(TimerConfig::one_shot().on_expire(on_expire)).expect("timer");

        timers.start(id, 2).expect("start");
        timers.tick();
        timers.start(id, 2).expect("restart");
        timers.tick();
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        timers.tick();
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn pool_exhaustion_is_reported() {
        let timers = TimerService::new();
        for _ in 0..TIMER_POOL_SIZE {
            timers.initialize(TimerConfig::one_shot()).expect("timer");
        }
        assert_eq!(
            timers.initialize(TimerConfig::one_shot()).err(),
            Some(TimerError::PoolExhausted(TIMER_POOL_SIZE))
        );
    }

    #[test]
    fn unknown_timer_is_rejected() {
        let timers = TimerService::new();
        let other = TimerService::new();
        let id = other.initialize(TimerConfig::one_shot()).expect("timer");
        assert_eq!(timers.start(id, 1), Err(TimerError::UnknownTimer(id)));
    }

    #[test]
    fn expiry_callback_may_restart_its_timer() {
        let timers = Arc::new(TimerService::new());
        let (fired, count) = counter();
        let service = timers.clone();
        let id = timers
            .initialize(TimerConfig::one_shot().on_expire(move |id| {
                count(id);
                let _ = service.start(id, 1);
            }))
            .expect("timer");

        timers.start(id, 1).expect("start");
        timers.tick();
        timers.tick();
        assert_eq!(fired.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn block_for_waits_on_tick_source() {
        let timers = Arc::new(TimerService::new());
        let id = timers.initialize(TimerConfig::one_shot()).expect("timer");
        let ticker = timers.clone();
        let running = Arc::new(AtomicBool::new(true));
        let keep_ticking = running.clone();
        let handle = thread::spawn(move || {
            while keep_ticking.load(Ordering::SeqCst) {
                ticker.tick();
                thread::sleep(Duration::from_millis(1));
            }
        });

        timers.block_for(id, 5).expect("delay");
        assert!(!timers.is_armed(id));

        running.store(false, Ordering::SeqCst);
        handle.join().expect("ticker thread");
    }
}
