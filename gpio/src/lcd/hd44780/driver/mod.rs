mod sim;

use crate::{GpioError, GpioResult};
pub use sim::*;
use std::fmt::Debug;

/// Instruction opcodes. The set bit with the highest weight selects the instruction, the bits below
/// it are its flags.
pub mod command {
    pub const CLEAR_DISPLAY: u8 = 0b0000_0001;
    pub const RETURN_HOME: u8 = 0b0000_0010;
    pub const ENTRY_MODE: u8 = 0b0000_0100;
    pub const DISPLAY_CONTROL: u8 = 0b0000_1000;
    pub const SHIFT: u8 = 0b0001_0000;
    pub const FUNCTION_SET: u8 = 0b0010_0000;
    pub const SET_CGRAM_ADDRESS: u8 = 0b0100_0000;
    pub const SET_DDRAM_ADDRESS: u8 = 0b1000_0000;
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum CursorDirection {
    /// Moves the cursor to the left after writing/reading data.
    Left,
    /// Moves the cursor to the right after writing/reading data.
    Right,
}

/// Entry mode: where the address counter goes after each data access.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct EntryMode {
    pub direction: CursorDirection,
    /// Shift the whole display instead of just the cursor.
    pub shift_display: bool,
}

impl Default for EntryMode {
    fn default() -> Self {
        EntryMode { direction: CursorDirection::Right, shift_display: false }
    }
}

#[derive(Debug, Copy, Clone, Default, Eq, PartialEq)]
pub struct DisplayControl {
    pub display_on: bool,
    pub cursor_on: bool,
    pub blink_on: bool,
}

/// Interface width, line count and font.
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq)]
pub struct FunctionSet {
    pub eight_bit_bus: bool,
    pub two_lines: bool,
    /// 5x10 dots instead of 5x8.
    pub tall_font: bool,
}

pub trait HD44780Driver: Debug + Send {
    /// Clears the display and sets the cursor to the home position.
    fn clear_display(&mut self) -> GpioResult<()> {
        self.send_command(command::CLEAR_DISPLAY)
    }

    /// Sets the cursor to the home position and undoes any display shift.
    fn return_home(&mut self) -> GpioResult<()> {
        self.send_command(command::RETURN_HOME)
    }

    /// Sets the display to the specified entry mode.
    fn set_entry_mode(&mut self, mode: EntryMode) -> GpioResult<()> {
        let mut command = command::ENTRY_MODE;
        if mode.direction == CursorDirection::Right {
            command |= 0b0000_0010;
        }
        if mode.shift_display {
            command |= 0b0000_0001;
        }
        self.send_command(command)
    }

    /// Sets the display on/off, cursor on/off, and blinking on/off.
    fn set_display_control(&mut self, control: DisplayControl) -> GpioResult<()> {
        let mut command = command::DISPLAY_CONTROL;
        if control.display_on {
            command |= 0b0000_0100;
        }
        if control.cursor_on {
            command |= 0b0000_0010;
        }
        if control.blink_on {
            command |= 0b0000_0001;
        }
        self.send_command(command)
    }

    /// Moves the cursor or shifts the display by one cell without touching DDRAM.
    fn cursor_shift(&mut self, display_shift: bool, direction: CursorDirection) -> GpioResult<()> {
        let mut command = command::SHIFT;
        if display_shift {
            command |= 0b0000_1000;
        }
        if direction == CursorDirection::Right {
            command |= 0b0000_0100;
        }
        self.send_command(command)
    }

    fn function_set(&mut self, function: FunctionSet) -> GpioResult<()> {
        let mut command = command::FUNCTION_SET;
        if function.eight_bit_bus {
            command |= 0b0001_0000;
        }
        if function.two_lines {
            command |= 0b0000_1000;
        }
        if function.tall_font {
            command |= 0b0000_0100;
        }
        self.send_command(command)
    }

    /// Sets the CGRAM address. Following data accesses go to glyph memory.
    ///
    /// # Errors
    /// - `GpioError::InvalidArgument` if the address does not fit in six bits.
    fn set_cgram_address(&mut self, address: u8) -> GpioResult<()> {
        if address > 0b0011_1111 {
            return Err(GpioError::InvalidArgument);
        }
        self.send_command(command::SET_CGRAM_ADDRESS | address)
    }

    /// Sets the DDRAM address. Following data accesses go to display memory.
    ///
    /// # Errors
    /// - `GpioError::InvalidArgument` if the address does not fit in seven bits.
    fn set_ddram_address(&mut self, address: u8) -> GpioResult<()> {
        if address > 0b0111_1111 {
            return Err(GpioError::InvalidArgument);
        }
        self.send_command(command::SET_DDRAM_ADDRESS | address)
    }

    /// Reads the busy flag and address counter.
    fn get_busy_flag_and_address(&mut self) -> GpioResult<(bool, u8)> {
        let status = self.read_command()?;
        Ok((status & 0b1000_0000 != 0, status & 0b0111_1111))
    }

    // Low-level access, implemented by the bus backend.

    /// Sends an instruction (RS low).
    fn send_command(&mut self, command: u8) -> GpioResult<()>;

    /// Sends data (RS high).
    fn send_data(&mut self, data: u8) -> GpioResult<()>;

    /// Reads the busy flag and address counter packed in one byte (RS low).
    ///
    /// Backends without a wired RW line return `GpioError::NotSupported`.
    fn read_command(&mut self) -> GpioResult<u8>;

    /// Reads data at the address counter (RS high).
    ///
    /// Backends without a wired RW line return `GpioError::NotSupported`.
    fn read_data(&mut self) -> GpioResult<u8>;
}
