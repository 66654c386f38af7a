mod gpio;
mod sim;

use std::fmt::Debug;
use crate::GpioResult;
pub use gpio::*;
pub use sim::*;

/// Number of rows in the keypad matrix.
pub const ROWS: usize = 4;
/// Number of columns in the keypad matrix.
pub const COLUMNS: usize = 4;

/// Bitmask of pressed buttons, one bit per key at `row * 4 + column`.
pub type ButtonMask = u16;

/// Represents the keys on a 4x4 keypad.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum KeypadKey {
    /// The `1` key.
    Key1,
    /// The `2` key.
    Key2,
    /// The `3` key.
    Key3,
    /// The `4` key.
    Key4,
    /// The `5` key.
    Key5,
    /// The `6` key.
    Key6,
    /// The `7` key.
    Key7,
    /// The `8` key, doubling as Up while navigating.
    Key8,
    /// The `9` key.
    Key9,
    /// The `0` key, doubling as Down while navigating.
    Key0,
    /// The `*` key, used as Left/Exit.
    KeyAsterisk,
    /// The `#` key, used as Right/Enter.
    KeyHash,
    /// The `A` key.
    KeyA,
    /// The `B` key.
    KeyB,
    /// The `C` key.
    KeyC,
    /// The `D` key.
    KeyD,
}

use KeypadKey::*;

const LAYOUT: [[KeypadKey; COLUMNS]; ROWS] = [
    [ Key1, Key2, Key3, KeyA, ],
    [ Key4, Key5, Key6, KeyB, ],
    [ Key7, Key8, Key9, KeyC, ],
    [ KeyAsterisk, Key0, KeyHash, KeyD, ],
];

impl KeypadKey {
    /// Converts a position tuple (row, column) to a [KeypadKey].
    pub fn from_position(row: usize, column: usize) -> Option<KeypadKey> {
        LAYOUT.get(row)?.get(column).copied()
    }

    /// Gets the (row, column) position of the key in the matrix.
    pub fn position(self) -> (usize, usize) {
        match self {
            Key1 => (0, 0),
            Key2 => (0, 1),
            Key3 => (0, 2),
            KeyA => (0, 3),
            Key4 => (1, 0),
            Key5 => (1, 1),
            Key6 => (1, 2),
            KeyB => (1, 3),
            Key7 => (2, 0),
            Key8 => (2, 1),
            Key9 => (2, 2),
            KeyC => (2, 3),
            KeyAsterisk => (3, 0),
            Key0 => (3, 1),
            KeyHash => (3, 2),
            KeyD => (3, 3),
        }
    }

    /// Gets the single-bit [ButtonMask] reported for this key.
    pub fn mask(self) -> ButtonMask {
        let (row, column) = self.position();
        1 << (row * COLUMNS + column)
    }

    /// Interprets a pressed-button mask as a single key.
    ///
    /// Returns `None` for an empty mask and for key combinations.
    pub fn from_mask(mask: ButtonMask) -> Option<KeypadKey> {
        if mask.count_ones() != 1 {
            return None;
        }
        let bit = mask.trailing_zeros() as usize;
        KeypadKey::from_position(bit / COLUMNS, bit % COLUMNS)
    }

    /// Converts the [KeypadKey] to its corresponding character.
    pub fn to_char(self) -> char {
        match self {
            Key1 => '1',
            Key2 => '2',
            Key3 => '3',
            Key4 => '4',
            Key5 => '5',
            Key6 => '6',
            Key7 => '7',
            Key8 => '8',
            Key9 => '9',
            Key0 => '0',
            KeyAsterisk => '*',
            KeyHash => '#',
            KeyA => 'A',
            KeyB => 'B',
            KeyC => 'C',
            KeyD => 'D',
        }
    }

    /// Parses a key label. Letters are accepted in either case.
    pub fn from_char(c: char) -> Option<KeypadKey> {
        LAYOUT
            .iter()
            .flatten()
            .copied()
            .find(|key| key.to_char() == c.to_ascii_uppercase())
    }

    /// Gets the digit printed on the key, if it is a digit key.
    pub fn digit(self) -> Option<char> {
        Some(self.to_char()).filter(char::is_ascii_digit)
    }
}

/// Clears latched row edges of the keypad's interrupt lines.
pub trait EdgeLatch: Debug + Send {
    /// Discards all pending row edges.
    fn clear(&mut self) -> GpioResult<()>;
}

/// Low-level access to a scanned keypad matrix.
///
/// All states are logical: `true` means active (column selected, row pulled by a pressed key),
/// regardless of how the lines are wired.
pub trait KeypadMatrix: Debug + Send {
    /// Selects or deselects a single column.
    fn set_column(&mut self, column: usize, active: bool) -> GpioResult<()>;

    /// Selects or deselects every column at once.
    fn set_all_columns(&mut self, active: bool) -> GpioResult<()> {
        for column in 0..COLUMNS {
            self.set_column(column, active)?;
        }
        Ok(())
    }

    /// Samples a row.
    fn is_row_active(&self, row: usize) -> GpioResult<bool>;

    /// Discards row edges latched by the interrupt controller.
    ///
    /// Matrices without an edge latch have nothing to clear.
    fn clear_edge_flags(&mut self) -> GpioResult<()> {
        Ok(())
    }
}
