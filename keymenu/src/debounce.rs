//! Row-edge debouncing and keypad scanning.
//!
//! A falling edge on a row line starts that row's debounce timer. When it expires and the row is
//! still pulled, the row is scanned column by column and the hits are OR-ed into the pressed-button
//! accumulator, which the main loop drains with [ButtonDebouncer::take_pressed].

use std::cell::RefCell;
use std::fmt::{Debug, Formatter};
use std::sync::Arc;
use std::sync::atomic::{AtomicU16, Ordering};
use critical_section::Mutex;
use log::{debug, trace, warn};
use keymenu_gpio::{GpioError, GpioResult};
use keymenu_gpio::keypad::{ButtonMask, KeypadMatrix, COLUMNS, ROWS};
use crate::timer::{TimerConfig, TimerError, TimerId, TimerService};

/// Debounce delay, in ticks.
pub const DEFAULT_DEBOUNCE_TICKS: u32 = 50;

/// How many samples to wait for a row to let go after its columns are deselected.
const SETTLE_SAMPLES: u32 = 10_000;

struct Scanner {
    matrix: Mutex<RefCell<Box<dyn KeypadMatrix>>>,
    pressed: AtomicU16,
    on_ready: Box<dyn Fn() + Send + Sync>,
}

impl Scanner {
    /// Debounce timer expiry for `row`, in tick context.
    fn debounced(&self, row: usize) {
        let result = critical_section::with(|cs| {
            let mut matrix = self.matrix.borrow_ref_mut(cs);
            let result = scan_row(matrix.as_mut(), row);
            if result.is_err() {
                // Leave the keypad able to raise edges again
                if let Err(e) = matrix.set_all_columns(true) {
                    warn!("Could not reselect the keypad columns: {}", e);
                }
                if let Err(e) = matrix.clear_edge_flags() {
                    warn!("Could not clear the keypad row edges: {}", e);
                }
            }
            result
        });

        match result {
            Ok(Some(mask)) => {
                debug!("Row {} scanned: {:#06x}", row, mask);
                self.pressed.fetch_or(mask, Ordering::SeqCst);
                (self.on_ready)();
            }
            Ok(None) => trace!("Row {} released before the debounce delay ran out.", row),
            Err(e) => warn!("Scanning keypad row {} failed: {}", row, e),
        }
    }
}

fn wait_row_released(matrix: &dyn KeypadMatrix, row: usize) -> GpioResult<()> {
    for _ in 0..SETTLE_SAMPLES {
        if !matrix.is_row_active(row)? {
            return Ok(());
        }
        std::hint::spin_loop();
    }
    Err(GpioError::Timeout)
}

/// Scans one row, returning `None` if it is no longer pulled.
fn scan_row(matrix: &mut dyn KeypadMatrix, row: usize) -> GpioResult<Option<ButtonMask>> {
    if !matrix.is_row_active(row)? {
        return Ok(None);
    }

    matrix.set_all_columns(false)?;
    wait_row_released(matrix, row)?;

    let mut mask: ButtonMask = 0;
    for column in 0..COLUMNS {
        matrix.set_column(column, true)?;
        if matrix.is_row_active(row)? {
            mask |= 1 << (row * COLUMNS + column);
        }
        matrix.set_column(column, false)?;
        wait_row_released(matrix, row)?;
    }

    matrix.set_all_columns(true)?;
    // Reselecting the columns makes held rows fall again
    matrix.clear_edge_flags()?;
    Ok(Some(mask))
}

/// Keypad debouncer with one one-shot timer per row.
pub struct ButtonDebouncer {
    scanner: Arc<Scanner>,
    row_timers: Vec<TimerId>,
    debounce_ticks: u32,
}

impl Debug for ButtonDebouncer {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ButtonDebouncer")
            .field("row_timers", &self.row_timers)
            .field("debounce_ticks", &self.debounce_ticks)
            .field("pressed", &self.scanner.pressed.load(Ordering::SeqCst))
            .finish()
    }
}

impl ButtonDebouncer {
    /// Registers the row timers. `on_ready` runs in tick context after every completed scan.
    ///
    /// The matrix is expected in its idle state, with every column selected.
    pub fn new(
        timers: &TimerService,
        matrix: Box<dyn KeypadMatrix>,
        debounce_ticks: u32,
        on_ready: impl Fn() + Send + Sync + 'static,
    ) -> Result<Self, TimerError> {
        let scanner = Arc::new(Scanner {
            matrix: Mutex::new(RefCell::new(matrix)),
            pressed: AtomicU16::new(0),
            on_ready: Box::new(on_ready),
        });

        let mut row_timers = Vec::with_capacity(ROWS);
        for row in 0..ROWS {
            let scanner = scanner.clone();
            let id = timers.initialize(TimerConfig::one_shot().on_expire(move |_| scanner.debounced(row)))?;
            row_timers.push(id);
        }

        Ok(ButtonDebouncer { scanner, row_timers, debounce_ticks })
    }

    /// Falling edge on a row line, in interrupt context. Restarts that row's debounce delay.
    pub fn on_row_edge(&self, timers: &TimerService, row: usize) {
        let Some(&id) = self.row_timers.get(row) else {
            warn!("Edge reported on nonexistent keypad row {}.", row);
            return;
        };
        if let Err(e) = timers.start(id, self.debounce_ticks) {
            warn!("Could not start debounce timer for row {}: {}", row, e);
        }
    }

    /// Takes every button reported since the last call, leaving the accumulator empty.
    pub fn take_pressed(&self) -> ButtonMask {
        self.scanner.pressed.swap(0, Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use keymenu_gpio::GpioActiveLevel;
    use keymenu_gpio::keypad::{GpioKeypadMatrix, KeypadKey, SimulatedMatrix};

    struct Rig {
        timers: TimerService,
        keypad: SimulatedMatrix,
        debouncer: ButtonDebouncer,
        ready: Arc<AtomicUsize>,
    }

    fn rig() -> Rig {
        let timers = TimerService::new();
        let keypad = SimulatedMatrix::new();
        let matrix = GpioKeypadMatrix::new(Box::new(keypad.columns()), Box::new(keypad.rows()))
            .with_active_level(GpioActiveLevel::Low)
            .with_edge_latch(Box::new(keypad.edge_latch()));
        let ready = Arc::new(AtomicUsize::new(0));
        let counter = ready.clone();
        let debouncer = ButtonDebouncer::new(&timers, Box::new(matrix), 3, move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .expect("debouncer");
        Rig { timers, keypad, debouncer, ready }
    }

    impl Rig {
        fn press(&self, key: KeypadKey) {
            if let Some(row) = self.keypad.press(key) {
                self.debouncer.on_row_edge(&self.timers, row);
            }
        }

        fn ticks(&self, count: usize) {
            for _ in 0..count {
                self.timers.tick();
            }
        }
    }

    #[test]
    fn held_key_is_reported_after_delay() {
        let rig = rig();
        rig.press(KeypadKey::Key8);
        rig.ticks(2);
        assert_eq!(rig.ready.load(Ordering::SeqCst), 0);
        rig.ticks(1);
        assert_eq!(rig.ready.load(Ordering::SeqCst), 1);
        assert_eq!(rig.debouncer.take_pressed(), 0x0200);
        assert_eq!(rig.debouncer.take_pressed(), 0);
    }

    #[test]
    fn bounce_shorter_than_delay_is_ignored() {
        let rig = rig();
        rig.press(KeypadKey::Key5);
        rig.keypad.release(KeypadKey::Key5);
        rig.ticks(5);
        assert_eq!(rig.ready.load(Ordering::SeqCst), 0);
        assert_eq!(rig.debouncer.take_pressed(), 0);
    }

    #[test]
    fn keys_on_same_row_are_reported_together() {
        let rig = rig();
        rig.press(KeypadKey::KeyAsterisk);
        rig.press(KeypadKey::KeyHash);
        rig.ticks(3);
        assert_eq!(rig.debouncer.take_pressed(), 0x1000 | 0x4000);
    }

    #[test]
    fn scan_restores_idle_columns_and_clears_edges() {
        let rig = rig();
        rig.press(KeypadKey::Key1);
        rig.ticks(3);
        assert_eq!(rig.keypad.pending_edges(), 0);

        // Columns are selected again, so a key on another row still raises an edge
        assert_eq!(rig.keypad.press(KeypadKey::Key7), Some(2));
    }

    /// Row 0 is stuck low and columns refuse to be deselected.
    #[derive(Debug, Default)]
    struct JammedMatrix {
        reselected: Arc<AtomicUsize>,
        cleared: Arc<AtomicUsize>,
    }

    impl KeypadMatrix for JammedMatrix {
        fn set_column(&mut self, _column: usize, active: bool) -> GpioResult<()> {
            if !active {
                return Err(GpioError::Timeout);
            }
            self.reselected.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn is_row_active(&self, row: usize) -> GpioResult<bool> {
            Ok(row == 0)
        }

        fn clear_edge_flags(&mut self) -> GpioResult<()> {
            self.cleared.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn failed_scan_still_rearms_keypad() {
        let timers = TimerService::new();
        let matrix = JammedMatrix::default();
        let (reselected, cleared) = (matrix.reselected.clone(), matrix.cleared.clone());
        let ready = Arc::new(AtomicUsize::new(0));
        let counter = ready.clone();
        let debouncer = ButtonDebouncer::new(&timers, Box::new(matrix), 3, move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .expect("debouncer");

        debouncer.on_row_edge(&timers, 0);
        for _ in 0..3 {
            timers.tick();
        }
        assert_eq!(ready.load(Ordering::SeqCst), 0);
        assert_eq!(debouncer.take_pressed(), 0);
        assert_eq!(reselected.load(Ordering::SeqCst), COLUMNS);
        assert_eq!(cleared.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn edge_on_unknown_row_is_ignored() {
        let rig = rig();
        rig.debouncer.on_row_edge(&rig.timers, 9);
        rig.ticks(5);
        assert_eq!(rig.ready.load(Ordering::SeqCst), 0);
    }
}
