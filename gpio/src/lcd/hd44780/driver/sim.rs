//! An in-memory HD44780 controller model.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use log::trace;
use crate::GpioResult;
use crate::lcd::hd44780::driver::{
    command, CursorDirection, DisplayControl, EntryMode, FunctionSet, HD44780Driver,
};
use crate::lcd::hd44780::{CUSTOM_GLYPHS, GLYPH_ROWS, LINES, LINE_ADDRESSES, LINE_LENGTH};

const CGRAM_SIZE: usize = CUSTOM_GLYPHS * GLYPH_ROWS;

#[derive(Debug)]
struct Controller {
    ddram: [[u8; LINE_LENGTH]; LINES],
    cgram: [u8; CGRAM_SIZE],
    /// Address counter in DDRAM address space.
    address: u8,
    cgram_address: u8,
    /// Data accesses currently target CGRAM.
    cgram_selected: bool,
    entry: EntryMode,
    control: DisplayControl,
    function: FunctionSet,
    /// First DDRAM column shown on the panel.
    display_offset: usize,
    /// Remaining status reads that report busy.
    busy_reads: u32,
}

impl Default for Controller {
    fn default() -> Self {
        Controller {
            ddram: [[b' '; LINE_LENGTH]; LINES],
            cgram: [0; CGRAM_SIZE],
            address: 0,
            cgram_address: 0,
            cgram_selected: false,
            entry: EntryMode::default(),
            control: DisplayControl::default(),
            function: FunctionSet::default(),
            display_offset: 0,
            busy_reads: 0,
        }
    }
}

impl Controller {
    fn cell(address: u8) -> (usize, usize) {
        let line = if address >= LINE_ADDRESSES[1] { 1 } else { 0 };
        let column = (address - LINE_ADDRESSES[line]) as usize % LINE_LENGTH;
        (line, column)
    }

    /// Moves the address counter one cell, wrapping from the end of one line to the start of the
    /// other the way the controller does.
    fn step(&mut self, direction: CursorDirection) {
        let (line, column) = Self::cell(self.address);
        let (line, column) = match direction {
            CursorDirection::Right if column + 1 == LINE_LENGTH => ((line + 1) % LINES, 0),
            CursorDirection::Right => (line, column + 1),
            CursorDirection::Left if column == 0 => ((line + LINES - 1) % LINES, LINE_LENGTH - 1),
            CursorDirection::Left => (line, column - 1),
        };
        self.address = LINE_ADDRESSES[line] + column as u8;
    }

    fn shift_display(&mut self, direction: CursorDirection) {
        // Shifting the display left brings later columns into view
        self.display_offset = match direction {
            CursorDirection::Left => (self.display_offset + 1) % LINE_LENGTH,
            CursorDirection::Right => (self.display_offset + LINE_LENGTH - 1) % LINE_LENGTH,
        };
    }

    fn after_access(&mut self) {
        if self.cgram_selected {
            self.cgram_address = (self.cgram_address + 1) % CGRAM_SIZE as u8;
            return;
        }
        self.step(self.entry.direction);
        if self.entry.shift_display {
            self.shift_display(self.entry.direction);
        }
    }

    fn execute(&mut self, instruction: u8) {
        let direction = |bit: u8| if instruction & bit != 0 { CursorDirection::Right } else { CursorDirection::Left };

        if instruction & command::SET_DDRAM_ADDRESS != 0 {
            self.address = instruction & 0b0111_1111;
            self.cgram_selected = false;
        } else if instruction & command::SET_CGRAM_ADDRESS != 0 {
            self.cgram_address = instruction & 0b0011_1111;
            self.cgram_selected = true;
        } else if instruction & command::FUNCTION_SET != 0 {
            self.function = FunctionSet {
                eight_bit_bus: instruction & 0b0001_0000 != 0,
                two_lines: instruction & 0b0000_1000 != 0,
                tall_font: instruction & 0b0000_0100 != 0,
            };
        } else if instruction & command::SHIFT != 0 {
            if instruction & 0b0000_1000 != 0 {
                self.shift_display(direction(0b0000_0100));
            } else {
                self.step(direction(0b0000_0100));
            }
        } else if instruction & command::DISPLAY_CONTROL != 0 {
            self.control = DisplayControl {
                display_on: instruction & 0b0000_0100 != 0,
                cursor_on: instruction & 0b0000_0010 != 0,
                blink_on: instruction & 0b0000_0001 != 0,
            };
        } else if instruction & command::ENTRY_MODE != 0 {
            self.entry = EntryMode {
                direction: direction(0b0000_0010),
                shift_display: instruction & 0b0000_0001 != 0,
            };
        } else if instruction & command::RETURN_HOME != 0 {
            self.address = 0;
            self.display_offset = 0;
            self.cgram_selected = false;
        } else if instruction & command::CLEAR_DISPLAY != 0 {
            self.ddram = [[b' '; LINE_LENGTH]; LINES];
            self.address = 0;
            self.display_offset = 0;
            self.cgram_selected = false;
            self.entry.direction = CursorDirection::Right;
        }
    }
}

fn lock(controller: &Mutex<Controller>) -> MutexGuard<'_, Controller> {
    controller.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Simulated HD44780 controller with both RS and RW lines wired.
#[derive(Debug, Default)]
pub struct SimulatedHD44780 {
    controller: Arc<Mutex<Controller>>,
}

impl SimulatedHD44780 {
    pub fn new() -> Self {
        Self::default()
    }

    /// Gets a handle for looking at the panel.
    pub fn screen(&self, visible_columns: usize) -> LcdScreen {
        LcdScreen {
            controller: self.controller.clone(),
            visible_columns: visible_columns.min(LINE_LENGTH),
        }
    }

    /// Makes the next `reads` status reads report the busy flag. `u32::MAX` keeps it busy forever.
    pub fn hold_busy(&self, reads: u32) {
        lock(&self.controller).busy_reads = reads;
    }
}

impl HD44780Driver for SimulatedHD44780 {
    fn send_command(&mut self, command: u8) -> GpioResult<()> {
        trace!("Simulated LCD command: {:08b}", command);
        lock(&self.controller).execute(command);
        Ok(())
    }

    fn send_data(&mut self, data: u8) -> GpioResult<()> {
        trace!("Simulated LCD data: {:#04x}", data);
        let mut controller = lock(&self.controller);
        if controller.cgram_selected {
            let address = controller.cgram_address as usize;
            controller.cgram[address] = data & 0b0001_1111;
        } else {
            let (line, column) = Controller::cell(controller.address);
            controller.ddram[line][column] = data;
        }
        controller.after_access();
        Ok(())
    }

    fn read_command(&mut self) -> GpioResult<u8> {
        let mut controller = lock(&self.controller);
        let busy = controller.busy_reads > 0;
        if busy && controller.busy_reads != u32::MAX {
            controller.busy_reads -= 1;
        }
        let flag = if busy { 0b1000_0000 } else { 0 };
        Ok(flag | controller.address)
    }

    fn read_data(&mut self) -> GpioResult<u8> {
        let mut controller = lock(&self.controller);
        let data = if controller.cgram_selected {
            controller.cgram[controller.cgram_address as usize]
        } else {
            let (line, column) = Controller::cell(controller.address);
            controller.ddram[line][column]
        };
        controller.after_access();
        Ok(data)
    }
}

/// What a person looking at the panel would see.
#[derive(Clone, Debug)]
pub struct LcdScreen {
    controller: Arc<Mutex<Controller>>,
    visible_columns: usize,
}

impl LcdScreen {
    /// Gets the full DDRAM contents of a line. Custom glyph codes show up as control characters.
    pub fn line(&self, line: usize) -> String {
        let controller = lock(&self.controller);
        controller.ddram[line % LINES].iter().map(|&b| b as char).collect()
    }

    /// Gets the visible window of a line, honoring the display shift.
    pub fn visible_line(&self, line: usize) -> String {
        let controller = lock(&self.controller);
        let cells = &controller.ddram[line % LINES];
        (0..self.visible_columns)
            .map(|i| cells[(controller.display_offset + i) % LINE_LENGTH] as char)
            .collect()
    }

    /// Gets the cursor cell, if the cursor is shown.
    pub fn cursor(&self) -> Option<(usize, usize)> {
        let controller = lock(&self.controller);
        if controller.control.cursor_on && !controller.cgram_selected {
            Some(Controller::cell(controller.address))
        } else {
            None
        }
    }

    pub fn is_display_on(&self) -> bool {
        lock(&self.controller).control.display_on
    }

    pub fn function(&self) -> FunctionSet {
        lock(&self.controller).function
    }

    /// Gets the rows of a custom glyph.
    pub fn glyph(&self, index: usize) -> [u8; GLYPH_ROWS] {
        let controller = lock(&self.controller);
        let start = (index % CUSTOM_GLYPHS) * GLYPH_ROWS;
        let mut rows = [0; GLYPH_ROWS];
        rows.copy_from_slice(&controller.cgram[start..start + GLYPH_ROWS]);
        rows
    }

    pub fn visible_columns(&self) -> usize {
        self.visible_columns
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lcd::hd44780::ddram_address;

    fn write_str(lcd: &mut SimulatedHD44780, text: &str) {
        for b in text.bytes() {
            lcd.send_data(b).expect("write data");
        }
    }

    #[test]
    fn data_lands_at_address_counter() {
        let mut lcd = SimulatedHD44780::new();
        let screen = lcd.screen(16);
        lcd.set_ddram_address(ddram_address(1, 3).expect("cell")).expect("set address");
        write_str(&mut lcd, "abc");
        assert_eq!(&screen.line(1)[..8], "   abc  ");
        assert_eq!(screen.line(0).trim(), "");
    }

    #[test]
    fn address_wraps_between_lines() {
        let mut lcd = SimulatedHD44780::new();
        let screen = lcd.screen(16);
        lcd.set_ddram_address(ddram_address(0, 39).expect("cell")).expect("set address");
        write_str(&mut lcd, "xy");
        assert!(screen.line(0).ends_with('x'));
        assert!(screen.line(1).starts_with('y'));
    }

    #[test]
    fn cursor_shift_and_read_back() {
        let mut lcd = SimulatedHD44780::new();
        write_str(&mut lcd, "ab");
        lcd.cursor_shift(false, CursorDirection::Left).expect("shift");
        assert_eq!(lcd.get_busy_flag_and_address().expect("status"), (false, 1));
        assert_eq!(lcd.read_data().expect("read"), b'b');
    }

    #[test]
    fn display_shift_moves_visible_window() {
        let mut lcd = SimulatedHD44780::new();
        let screen = lcd.screen(4);
        write_str(&mut lcd, "abcdef");
        lcd.cursor_shift(true, CursorDirection::Left).expect("shift");
        assert_eq!(screen.visible_line(0), "bcde");
        lcd.return_home().expect("home");
        assert_eq!(screen.visible_line(0), "abcd");
    }

    #[test]
    fn cgram_writes_do_not_touch_ddram() {
        let mut lcd = SimulatedHD44780::new();
        let screen = lcd.screen(16);
        lcd.set_cgram_address(8).expect("cgram address");
        for row in [1u8, 2, 3, 4, 5, 6, 7, 8] {
            lcd.send_data(row).expect("glyph row");
        }
        assert_eq!(screen.glyph(1), [1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(screen.line(0).trim(), "");
    }

    #[test]
    fn busy_flag_clears_after_held_reads() {
        let mut lcd = SimulatedHD44780::new();
        lcd.hold_busy(2);
        assert!(lcd.get_busy_flag_and_address().expect("status").0);
        assert!(lcd.get_busy_flag_and_address().expect("status").0);
        assert!(!lcd.get_busy_flag_and_address().expect("status").0);
    }

    #[test]
    fn display_control_reports_cursor() {
        let mut lcd = SimulatedHD44780::new();
        let screen = lcd.screen(16);
        assert_eq!(screen.cursor(), None);
        lcd.set_display_control(DisplayControl { display_on: true, cursor_on: true, blink_on: false })
            .expect("display control");
        lcd.set_ddram_address(0x42).expect("set address");
        assert_eq!(screen.cursor(), Some((1, 2)));
        assert!(screen.is_display_on());
    }
}
