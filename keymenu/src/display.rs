//! Text output contract used by the menu, and its HD44780 implementation.

use std::fmt::{Debug, Formatter};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use log::{debug, trace, warn};
use thiserror::Error;
use keymenu_gpio::GpioError;
use keymenu_gpio::lcd::hd44780::{ddram_address, GLYPH_ROWS, LINES, LINE_LENGTH};
use keymenu_gpio::lcd::hd44780::driver::{
    CursorDirection, DisplayControl, EntryMode, FunctionSet, HD44780Driver,
};
use crate::timer::{TimerConfig, TimerError, TimerId, TimerService};

/// Columns visible on the panel.
pub const VISIBLE_COLUMNS: usize = 16;

#[derive(Debug, Error, Clone, Eq, PartialEq)]
pub enum DisplayError {
    #[error("position ({line}, {position}) is outside the display")]
    OutOfBounds { line: usize, position: usize },
    #[error("{length} characters at column {position} do not fit in a line")]
    TooLong { position: usize, length: usize },
    #[error("the LCD stayed busy past its timeout")]
    BusyTimeout,
    #[error("line {line} reads back {found:?} instead of {expected:?}")]
    VerifyMismatch { line: usize, expected: String, found: String },
    #[error("LCD bus error: {0}")]
    Bus(#[from] GpioError),
    #[error(transparent)]
    Timer(#[from] TimerError),
}

pub type DisplayResult<T> = Result<T, DisplayError>;

/// Where [Display::write_string] places text within the visible columns.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum Align {
    /// At the given position.
    #[default]
    Left,
    /// Centered, ignoring the given position.
    Center,
    /// Flush with the last visible column, ignoring the given position.
    Right,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Shift {
    CursorLeft,
    CursorRight,
    DisplayLeft,
    DisplayRight,
}

/// Display attributes. They come in pairs, and setting one re-issues the instruction that carries
/// it.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Attribute {
    FourBitBus,
    EightBitBus,
    OneLine,
    TwoLines,
    NormalFont,
    TallFont,
    DisplayOff,
    DisplayOn,
    CursorOff,
    CursorOn,
    BlinkOff,
    BlinkOn,
    CursorMoveLeft,
    CursorMoveRight,
    NoDisplayShift,
    DisplayShift,
}

/// A two-line character display with a 40-column buffer per line.
pub trait Display: Debug {
    /// Runs the power-on sequence. The display is blank and ready for text afterwards.
    fn initialize(&mut self) -> DisplayResult<()>;

    /// Rewrites a whole line: `position` spaces, the text, then spaces up to the end of the buffer.
    ///
    /// # Errors
    /// - `DisplayError::OutOfBounds` for a line or position outside the buffer.
    /// - `DisplayError::TooLong` if the text runs past the end of the buffer.
    fn write_string(&mut self, line: usize, position: usize, text: &str, align: Align) -> DisplayResult<()>;

    /// Writes one character code at the cursor, which then advances.
    fn write_character(&mut self, code: u8) -> DisplayResult<()>;

    fn write_character_at(&mut self, line: usize, position: usize, code: u8) -> DisplayResult<()> {
        self.go_to(line, position)?;
        self.write_character(code)
    }

    /// Moves the cursor.
    fn go_to(&mut self, line: usize, position: usize) -> DisplayResult<()>;

    fn clear_display(&mut self) -> DisplayResult<()>;

    /// Moves the cursor or the whole display by one cell.
    fn shift(&mut self, shift: Shift) -> DisplayResult<()>;

    fn set_attributes(&mut self, attributes: &[Attribute]) -> DisplayResult<()>;
}

/// Custom CGRAM glyphs loaded at start-up, in code order: celsius, battery, signal, bluetooth,
/// speaker, charging, plug, usb.
pub const LOGO_GLYPHS: [[u8; GLYPH_ROWS]; 8] = [
    [0b11000, 0b11000, 0b00110, 0b01001, 0b01000, 0b01001, 0b00110, 0b00000],
    [0b01110, 0b11011, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b11111],
    [0b00001, 0b00001, 0b00101, 0b00101, 0b10101, 0b10101, 0b10101, 0b10101],
    [0b00100, 0b00110, 0b10101, 0b01110, 0b01110, 0b10101, 0b00110, 0b00100],
    [0b00001, 0b00011, 0b11101, 0b10001, 0b10001, 0b11101, 0b00011, 0b00001],
    [0b00001, 0b00110, 0b01110, 0b11100, 0b00111, 0b01110, 0b01100, 0b10000],
    [0b01010, 0b01010, 0b11111, 0b10001, 0b10001, 0b01010, 0b00100, 0b00100],
    [0b01110, 0b01010, 0b11111, 0b10001, 0b10001, 0b10001, 0b01110, 0b00100],
];

/// Controller delays, in timer ticks.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Hd44780Timing {
    /// Wait after power-on before the first instruction.
    pub power_on_ticks: u32,
    /// Wait between the two initial function set instructions.
    pub function_set_ticks: u32,
    /// Longest wait for the busy flag to clear.
    pub busy_timeout_ticks: u32,
}

impl Default for Hd44780Timing {
    fn default() -> Self {
        Hd44780Timing { power_on_ticks: 16, function_set_ticks: 5, busy_timeout_ticks: 10 }
    }
}

/// [Display] on an HD44780-compatible controller.
pub struct Hd44780Display<D: HD44780Driver> {
    driver: D,
    timers: Arc<TimerService>,
    timing: Hd44780Timing,
    busy_timer: TimerId,
    delay_timer: TimerId,
    busy_timed_out: Arc<AtomicBool>,
    function: FunctionSet,
    control: DisplayControl,
    entry: EntryMode,
}

impl<D: HD44780Driver> Debug for Hd44780Display<D> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Hd44780Display({:?}, {:?}, {:?})", self.driver, self.function, self.control)
    }
}

fn encode(text: &str) -> Vec<u8> {
    text.chars()
        .map(|c| {
            if c.is_ascii() {
                c as u8
            } else {
                warn!("Non-ASCII character: {}", c);
                b'?'
            }
        })
        .collect()
}

impl<D: HD44780Driver> Hd44780Display<D> {
    /// Registers the busy-flag and delay timers. Nothing is sent until [Display::initialize].
    pub fn new(driver: D, timers: Arc<TimerService>, timing: Hd44780Timing) -> Result<Self, TimerError> {
        let busy_timed_out = Arc::new(AtomicBool::new(false));
        let (cleared, expired) = (busy_timed_out.clone(), busy_timed_out.clone());
        let busy_timer = timers.initialize(
            TimerConfig::one_shot()
                .on_start(move |_| cleared.store(false, Ordering::SeqCst))
                .on_expire(move |_| expired.store(true, Ordering::SeqCst)),
        )?;
        let delay_timer = timers.initialize(TimerConfig::one_shot())?;

        Ok(Hd44780Display {
            driver,
            timers,
            timing,
            busy_timer,
            delay_timer,
            busy_timed_out,
            function: FunctionSet { eight_bit_bus: true, two_lines: true, tall_font: false },
            control: DisplayControl { display_on: true, cursor_on: false, blink_on: false },
            entry: EntryMode::default(),
        })
    }

    /// Polls the busy flag until it clears or the busy timer runs out.
    fn wait_ready(&mut self) -> DisplayResult<()> {
        self.timers.start(self.busy_timer, self.timing.busy_timeout_ticks)?;
        let result = loop {
            match self.driver.get_busy_flag_and_address() {
                Ok((false, _)) => break Ok(()),
                Ok((true, _)) if self.busy_timed_out.load(Ordering::SeqCst) => {
                    break Err(DisplayError::BusyTimeout);
                }
                Ok((true, _)) => std::hint::spin_loop(),
                // Write-only wiring, the instruction delays have to do
                Err(GpioError::NotSupported) => break Ok(()),
                Err(e) => break Err(e.into()),
            }
        };
        self.timers.stop(self.busy_timer)?;
        result
    }

    fn command(&mut self, send: impl FnOnce(&mut D) -> keymenu_gpio::GpioResult<()>) -> DisplayResult<()> {
        self.wait_ready()?;
        send(&mut self.driver)?;
        Ok(())
    }

    fn data(&mut self, byte: u8) -> DisplayResult<()> {
        self.wait_ready()?;
        self.driver.send_data(byte)?;
        Ok(())
    }

    fn load_glyphs(&mut self) -> DisplayResult<()> {
        self.command(|lcd| lcd.set_cgram_address(0))?;
        for row in LOGO_GLYPHS.iter().flatten() {
            self.data(*row)?;
        }
        // Back to DDRAM for any following data
        self.command(|lcd| lcd.return_home())
    }

    /// Reads a line back from DDRAM and compares it with what was written.
    fn verify(&mut self, line: usize, expected: &[u8]) -> DisplayResult<()> {
        self.go_to(line, 0)?;
        let mut found = Vec::with_capacity(expected.len());
        for _ in 0..expected.len() {
            self.wait_ready()?;
            match self.driver.read_data() {
                Ok(byte) => found.push(byte),
                Err(GpioError::NotSupported) => return Ok(()),
                Err(e) => return Err(e.into()),
            }
        }
        if found != expected {
            return Err(DisplayError::VerifyMismatch {
                line,
                expected: String::from_utf8_lossy(expected).into_owned(),
                found: String::from_utf8_lossy(&found).into_owned(),
            });
        }
        Ok(())
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }
}

impl<D: HD44780Driver> Display for Hd44780Display<D> {
    fn initialize(&mut self) -> DisplayResult<()> {
        debug!("Initializing LCD...");
        self.timers.block_for(self.delay_timer, self.timing.power_on_ticks)?;
        // The busy flag cannot be checked before the interface width is set
        self.driver.function_set(self.function)?;
        self.timers.block_for(self.delay_timer, self.timing.function_set_ticks)?;
        self.driver.function_set(self.function)?;

        let (control, entry) = (self.control, self.entry);
        self.command(|lcd| lcd.set_display_control(control))?;
        self.command(|lcd| lcd.clear_display())?;
        self.command(|lcd| lcd.set_entry_mode(entry))?;
        self.load_glyphs()?;
        debug!("LCD initialized.");
        Ok(())
    }

    fn write_string(&mut self, line: usize, position: usize, text: &str, align: Align) -> DisplayResult<()> {
        let text = encode(text);
        let position = match align {
            Align::Left => position,
            Align::Center => VISIBLE_COLUMNS.saturating_sub(text.len()) / 2,
            Align::Right => VISIBLE_COLUMNS.saturating_sub(text.len()),
        };
        if line >= LINES || position >= LINE_LENGTH {
            return Err(DisplayError::OutOfBounds { line, position });
        }
        if position + text.len() > LINE_LENGTH {
            return Err(DisplayError::TooLong { position, length: text.len() });
        }

        let mut content = vec![b' '; LINE_LENGTH];
        content[position..position + text.len()].copy_from_slice(&text);
        trace!("Line {}: {:?}", line, String::from_utf8_lossy(&content));

        self.go_to(line, 0)?;
        for byte in content.iter() {
            self.data(*byte)?;
        }
        self.verify(line, &content)
    }

    fn write_character(&mut self, code: u8) -> DisplayResult<()> {
        self.data(code)
    }

    fn go_to(&mut self, line: usize, position: usize) -> DisplayResult<()> {
        let address = ddram_address(line, position).ok_or(DisplayError::OutOfBounds { line, position })?;
        if address == 0 {
            self.command(|lcd| lcd.return_home())
        } else {
            self.command(|lcd| lcd.set_ddram_address(address))
        }
    }

    fn clear_display(&mut self) -> DisplayResult<()> {
        self.command(|lcd| lcd.clear_display())
    }

    fn shift(&mut self, shift: Shift) -> DisplayResult<()> {
        let (display, direction) = match shift {
            Shift::CursorLeft => (false, CursorDirection::Left),
            Shift::CursorRight => (false, CursorDirection::Right),
            Shift::DisplayLeft => (true, CursorDirection::Left),
            Shift::DisplayRight => (true, CursorDirection::Right),
        };
        self.command(|lcd| lcd.cursor_shift(display, direction))
    }

    fn set_attributes(&mut self, attributes: &[Attribute]) -> DisplayResult<()> {
        for attribute in attributes {
            match attribute {
                Attribute::FourBitBus => self.function.eight_bit_bus = false,
                Attribute::EightBitBus => self.function.eight_bit_bus = true,
                Attribute::OneLine => self.function.two_lines = false,
                Attribute::TwoLines => self.function.two_lines = true,
                Attribute::NormalFont => self.function.tall_font = false,
                Attribute::TallFont => self.function.tall_font = true,
                Attribute::DisplayOff => self.control.display_on = false,
                Attribute::DisplayOn => self.control.display_on = true,
                Attribute::CursorOff => self.control.cursor_on = false,
                Attribute::CursorOn => self.control.cursor_on = true,
                Attribute::BlinkOff => self.control.blink_on = false,
                Attribute::BlinkOn => self.control.blink_on = true,
                Attribute::CursorMoveLeft => self.entry.direction = CursorDirection::Left,
                Attribute::CursorMoveRight => self.entry.direction = CursorDirection::Right,
                Attribute::NoDisplayShift => self.entry.shift_display = false,
                Attribute::DisplayShift => self.entry.shift_display = true,
            }

            let (function, control, entry) = (self.function, self.control, self.entry);
            match attribute {
                Attribute::FourBitBus | Attribute::EightBitBus
                | Attribute::OneLine | Attribute::TwoLines
                | Attribute::NormalFont | Attribute::TallFont => self.command(|lcd| lcd.function_set(function))?,
                Attribute::DisplayOff | Attribute::DisplayOn
                | Attribute::CursorOff | Attribute::CursorOn
                | Attribute::BlinkOff | Attribute::BlinkOn => self.command(|lcd| lcd.set_display_control(control))?,
                Attribute::CursorMoveLeft | Attribute::CursorMoveRight
                | Attribute::NoDisplayShift | Attribute::DisplayShift => self.command(|lcd| lcd.set_entry_mode(entry))?,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;
    use keymenu_gpio::lcd::hd44780::driver::{LcdScreen, SimulatedHD44780};

    const NO_DELAYS: Hd44780Timing = Hd44780Timing { power_on_ticks: 0, function_set_ticks: 0, busy_timeout_ticks: 10 };

    fn display() -> (Hd44780Display<SimulatedHD44780>, LcdScreen) {
        let driver = SimulatedHD44780::new();
        let screen = driver.screen(VISIBLE_COLUMNS);
        let mut lcd = Hd44780Display::new(driver, Arc::new(TimerService::new()), NO_DELAYS).expect("display");
        lcd.initialize().expect("initialize");
        (lcd, screen)
    }

    #[test]
    fn initialize_loads_glyphs_and_blanks_screen() {
        let (_lcd, screen) = display();
        assert!(screen.is_display_on());
        assert!(screen.function().two_lines);
        assert_eq!(screen.glyph(0), LOGO_GLYPHS[0]);
        assert_eq!(screen.glyph(7), LOGO_GLYPHS[7]);
        assert_eq!(screen.visible_line(0), " ".repeat(VISIBLE_COLUMNS));
        assert_eq!(screen.cursor(), None);
    }

    #[test]
    fn alignment_within_visible_columns() {
        let (mut lcd, screen) = display();
        lcd.write_string(0, 0, "2025-05-20", Align::Center).expect("center");
        lcd.write_string(1, 0, "abc", Align::Right).expect("right");
        assert_eq!(screen.visible_line(0), "   2025-05-20   ");
        assert_eq!(screen.visible_line(1), "             abc");
    }

    #[test]
    fn write_string_pads_whole_buffer_line() {
        let (mut lcd, screen) = display();
        lcd.write_string(1, 0, &"x".repeat(40), Align::Left).expect("fill");
        lcd.write_string(1, 1, "ON", Align::Left).expect("overwrite");
        assert_eq!(screen.line(1), format!(" ON{}", " ".repeat(37)));
    }

    #[test]
    fn out_of_range_text_is_rejected() {
        let (mut lcd, _screen) = display();
        assert_eq!(
            lcd.write_string(2, 0, "x", Align::Left),
            Err(DisplayError::OutOfBounds { line: 2, position: 0 })
        );
        assert_eq!(
            lcd.write_string(0, 30, "elevenchars", Align::Left),
            Err(DisplayError::TooLong { position: 30, length: 11 })
        );
    }

    #[test]
    fn cursor_moves_and_erases() {
        let (mut lcd, screen) = display();
        lcd.set_attributes(&[Attribute::CursorOn]).expect("cursor on");
        lcd.go_to(1, 0).expect("go to");
        for b in b"123" {
            lcd.write_character(*b).expect("write");
        }
        lcd.shift(Shift::CursorLeft).expect("left");
        lcd.write_character(b' ').expect("erase");
        lcd.shift(Shift::CursorLeft).expect("left");
        assert_eq!(&screen.visible_line(1)[..4], "12  ");
        assert_eq!(screen.cursor(), Some((1, 2)));
    }

    #[test]
    fn write_character_at_places_glyph() {
        let (mut lcd, screen) = display();
        lcd.write_character_at(0, 15, b'~').expect("write");
        assert_eq!(screen.visible_line(0).chars().last(), Some('~'));
    }

    #[test]
    fn stuck_busy_flag_times_out() {
        let driver = SimulatedHD44780::new();
        let timers = Arc::new(TimerService::new());
        let mut lcd = Hd44780Display::new(driver, timers.clone(), NO_DELAYS).expect("display");
        lcd.initialize().expect("initialize");
        lcd.driver().hold_busy(u32::MAX);

        let ticker = timers.clone();
        let handle = thread::spawn(move || {
            for _ in 0..200 {
                ticker.tick();
                thread::sleep(Duration::from_millis(1));
            }
        });

        assert_eq!(lcd.write_character(b'x'), Err(DisplayError::BusyTimeout));
        handle.join().expect("ticker thread");
    }
}
