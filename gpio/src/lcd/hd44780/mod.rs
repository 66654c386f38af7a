//! HD44780 LCD module.
//!
//! The controller holds two lines of 40 DDRAM cells each, of which a panel shows a window
//! (16 columns on the usual 16x2 modules). Line 0 starts at DDRAM address `0x00`, line 1 at `0x40`.

pub mod driver;

/// Number of lines held by the controller.
pub const LINES: usize = 2;
/// Number of DDRAM cells per line.
pub const LINE_LENGTH: usize = 40;
/// DDRAM address of the first cell of each line.
pub const LINE_ADDRESSES: [u8; LINES] = [0x00, 0x40];
/// Number of custom glyphs stored in CGRAM.
pub const CUSTOM_GLYPHS: usize = 8;
/// Rows in a 5x8 glyph.
pub const GLYPH_ROWS: usize = 8;

/// Gets the DDRAM address of a cell, if the cell exists.
pub fn ddram_address(line: usize, column: usize) -> Option<u8> {
    if column >= LINE_LENGTH {
        return None;
    }
    LINE_ADDRESSES.get(line).map(|base| base + column as u8)
}
