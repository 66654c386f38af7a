use std::fmt::{Debug, Formatter};
use log::trace;
use crate::{GpioActiveLevel, GpioBusInput, GpioBusOutput, GpioError, GpioResult};
use crate::keypad::{EdgeLatch, KeypadMatrix, COLUMNS, ROWS};

/// The `GpioKeypadMatrix` struct represents a GPIO-based keypad with 4 columns and 4 rows.
pub struct GpioKeypadMatrix {
    cols: Box<dyn GpioBusOutput<4>>,
    rows: Box<dyn GpioBusInput<4>>,
    active_level: GpioActiveLevel,
    selected: [bool; COLUMNS],
    edge_latch: Option<Box<dyn EdgeLatch>>,
}

impl Debug for GpioKeypadMatrix {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "GpioKeypadMatrix({:?}, {:?})", self.cols, self.rows)
    }
}

impl GpioKeypadMatrix {
    /// Creates a new `GpioKeypadMatrix` with the specified GPIO bus outputs for columns and inputs for rows.
    ///
    /// The columns are driven to select them, and the rows are sampled to find the pressed keys
    /// in the selected columns. Every column starts selected, which is the idle state that lets any
    /// key press produce a row edge.
    pub fn new(cols: Box<dyn GpioBusOutput<4>>, rows: Box<dyn GpioBusInput<4>>) -> Self {
        GpioKeypadMatrix {
            cols,
            rows,
            active_level: GpioActiveLevel::High,
            selected: [true; COLUMNS],
            edge_latch: None,
        }
    }

    /// Sets the active level shared by the column and row lines.
    pub fn with_active_level(mut self, level: GpioActiveLevel) -> Self {
        self.active_level = level;
        self
    }

    /// Attaches the latch holding row edges, cleared after every scan.
    pub fn with_edge_latch(mut self, latch: Box<dyn EdgeLatch>) -> Self {
        self.edge_latch = Some(latch);
        self
    }

    fn drive(&self) -> GpioResult<()> {
        let levels = self.selected.map(|active| self.active_level.get_state(active));
        trace!("Driving keypad columns: {:?}", levels);
        self.cols.write(&levels)
    }
}

impl KeypadMatrix for GpioKeypadMatrix {
    fn set_column(&mut self, column: usize, active: bool) -> GpioResult<()> {
        let slot = self.selected.get_mut(column).ok_or(GpioError::InvalidArgument)?;
        *slot = active;
        self.drive()
    }

    fn set_all_columns(&mut self, active: bool) -> GpioResult<()> {
        self.selected = [active; COLUMNS];
        self.drive()
    }

    fn is_row_active(&self, row: usize) -> GpioResult<bool> {
        if row >= ROWS {
            return Err(GpioError::InvalidArgument);
        }
        let levels = self.rows.read()?;
        Ok(self.active_level.get_state(levels[row]))
    }

    fn clear_edge_flags(&mut self) -> GpioResult<()> {
        match self.edge_latch.as_mut() {
            Some(latch) => latch.clear(),
            None => Ok(()),
        }
    }
}
