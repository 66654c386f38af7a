//! Simulated keypad wiring for running without hardware.
//!
//! Electrically this behaves like a typical active-low matrix: columns idle low (selected), rows are
//! pulled up and read low when a pressed key connects them to a low column.

use std::sync::Arc;
use std::sync::atomic::{AtomicU16, AtomicU8, Ordering};
use log::trace;
use crate::{GpioBusInput, GpioBusOutput, GpioResult};
use crate::keypad::{ButtonMask, EdgeLatch, KeypadKey, COLUMNS, ROWS};

#[derive(Debug, Default)]
struct Wiring {
    pressed: AtomicU16,
    /// Electrical column levels, bit set = high.
    columns: AtomicU8,
    /// Latched falling edges per row.
    edges: AtomicU8,
}

impl Wiring {
    /// Electrical row levels, bit set = high.
    fn row_levels(&self) -> u8 {
        let pressed = self.pressed.load(Ordering::SeqCst);
        let columns = self.columns.load(Ordering::SeqCst);
        let mut levels = 0b1111;
        for row in 0..ROWS {
            for column in 0..COLUMNS {
                let key_down = pressed & (1 << (row * COLUMNS + column)) != 0;
                let column_low = columns & (1 << column) == 0;
                if key_down && column_low {
                    levels &= !(1 << row);
                }
            }
        }
        levels
    }

    /// Runs `change` and latches every row that went from high to low because of it.
    fn latching(&self, change: impl FnOnce()) -> u8 {
        let before = self.row_levels();
        change();
        let after = self.row_levels();
        let falling = before & !after;
        self.edges.fetch_or(falling, Ordering::SeqCst);
        falling
    }
}

/// A keypad matrix living in memory.
///
/// Cloning gives another handle to the same wiring, so one handle can press keys while the bus
/// handles are owned by the scanner.
#[derive(Clone, Debug, Default)]
pub struct SimulatedMatrix {
    wiring: Arc<Wiring>,
}

impl SimulatedMatrix {
    pub fn new() -> Self {
        Self::default()
    }

    /// Presses a key.
    ///
    /// Returns the row whose line fell because of it, which is the row an edge interrupt would
    /// report.
    pub fn press(&self, key: KeypadKey) -> Option<usize> {
        let falling = self.wiring.latching(|| {
            self.wiring.pressed.fetch_or(key.mask(), Ordering::SeqCst);
        });
        trace!("Pressed {:?}, falling rows {:04b}", key, falling);
        (0..ROWS).find(|row| falling & (1 << row) != 0)
    }

    /// Releases a key.
    pub fn release(&self, key: KeypadKey) {
        self.wiring.pressed.fetch_and(!key.mask(), Ordering::SeqCst);
        trace!("Released {:?}", key);
    }

    /// Gets the keys currently held down.
    pub fn pressed(&self) -> ButtonMask {
        self.wiring.pressed.load(Ordering::SeqCst)
    }

    /// Gets the latched row edges without clearing them.
    pub fn pending_edges(&self) -> u8 {
        self.wiring.edges.load(Ordering::SeqCst)
    }

    /// Gets a handle driving the column lines.
    pub fn columns(&self) -> SimulatedColumns {
        SimulatedColumns { wiring: self.wiring.clone() }
    }

    /// Gets a handle sampling the row lines.
    pub fn rows(&self) -> SimulatedRows {
        SimulatedRows { wiring: self.wiring.clone() }
    }

    /// Gets a handle to the row edge latch.
    pub fn edge_latch(&self) -> SimulatedEdgeLatch {
        SimulatedEdgeLatch { wiring: self.wiring.clone() }
    }
}

#[derive(Debug)]
pub struct SimulatedColumns {
    wiring: Arc<Wiring>,
}

impl GpioBusOutput<4> for SimulatedColumns {
    fn write(&self, values: &[bool; 4]) -> GpioResult<()> {
        let levels = values
            .iter()
            .enumerate()
            .fold(0u8, |acc, (i, &high)| if high { acc | (1u8 << i) } else { acc });
        self.wiring.latching(|| self.wiring.columns.store(levels, Ordering::SeqCst));
        Ok(())
    }
}

#[derive(Debug)]
pub struct SimulatedRows {
    wiring: Arc<Wiring>,
}

impl GpioBusInput<4> for SimulatedRows {
    fn read(&self) -> GpioResult<[bool; 4]> {
        let levels = self.wiring.row_levels();
        Ok(std::array::from_fn(|row| levels & (1 << row) != 0))
    }
}

#[derive(Debug)]
pub struct SimulatedEdgeLatch {
    wiring: Arc<Wiring>,
}

impl EdgeLatch for SimulatedEdgeLatch {
    fn clear(&mut self) -> GpioResult<()> {
        self.wiring.edges.store(0, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{GpioActiveLevel, GpioError};
    use crate::keypad::{GpioKeypadMatrix, KeypadMatrix};

    fn matrix(sim: &SimulatedMatrix) -> GpioKeypadMatrix {
        GpioKeypadMatrix::new(Box::new(sim.columns()), Box::new(sim.rows()))
            .with_active_level(GpioActiveLevel::Low)
            .with_edge_latch(Box::new(sim.edge_latch()))
    }

    #[test]
    fn key_masks_follow_row_major_layout() {
        assert_eq!(KeypadKey::Key1.mask(), 0x0001);
        assert_eq!(KeypadKey::Key3.mask(), 0x0004);
        assert_eq!(KeypadKey::Key4.mask(), 0x0010);
        assert_eq!(KeypadKey::Key8.mask(), 0x0200);
        assert_eq!(KeypadKey::KeyAsterisk.mask(), 0x1000);
        assert_eq!(KeypadKey::Key0.mask(), 0x2000);
        assert_eq!(KeypadKey::KeyHash.mask(), 0x4000);
        assert_eq!(KeypadKey::KeyD.mask(), 0x8000);
    }

    #[test]
    fn from_mask_rejects_combinations() {
        assert_eq!(KeypadKey::from_mask(0x0200), Some(KeypadKey::Key8));
        assert_eq!(KeypadKey::from_mask(0), None);
        assert_eq!(KeypadKey::from_mask(0x0201), None);
    }

    #[test]
    fn press_reports_falling_row_while_columns_idle() {
        let sim = SimulatedMatrix::new();
        assert_eq!(sim.press(KeypadKey::Key5), Some(1));
        assert_eq!(sim.pending_edges(), 0b0010);
        // Second key on the same row does not produce another edge
        assert_eq!(sim.press(KeypadKey::Key6), None);
    }

    #[test]
    fn gpio_matrix_samples_selected_column_only() {
        let sim = SimulatedMatrix::new();
        let mut keypad = matrix(&sim);
        sim.press(KeypadKey::Key9);

        keypad.set_all_columns(false).expect("deselect columns");
        assert!(!keypad.is_row_active(2).expect("read row"));

        keypad.set_column(1, true).expect("select column 1");
        assert!(!keypad.is_row_active(2).expect("read row"));
        keypad.set_column(1, false).expect("deselect column 1");

        keypad.set_column(2, true).expect("select column 2");
        assert!(keypad.is_row_active(2).expect("read row"));
    }

    #[test]
    fn clearing_edge_flags_empties_latch() {
        let sim = SimulatedMatrix::new();
        let mut keypad = matrix(&sim);
        sim.press(KeypadKey::Key1);
        assert_ne!(sim.pending_edges(), 0);
        keypad.clear_edge_flags().expect("clear edges");
        assert_eq!(sim.pending_edges(), 0);
    }

    #[test]
    fn out_of_range_lines_are_rejected() {
        let sim = SimulatedMatrix::new();
        let mut keypad = matrix(&sim);
        assert_eq!(keypad.set_column(4, true), Err(GpioError::InvalidArgument));
        assert_eq!(keypad.is_row_active(7), Err(GpioError::InvalidArgument));
    }
}
