//! Glyph cycles for multi-tap text entry.

use keymenu_gpio::keypad::KeypadKey;

/// Ticks a pending glyph waits for another tap before it is committed.
pub const DEFAULT_TIMEOUT_TICKS: u32 = 1500;

/// Gets the glyphs a key cycles through, in tap order. Keys without glyphs return `None`.
pub fn glyphs(key: KeypadKey) -> Option<&'static [u8]> {
    let glyphs: &'static [u8] = match key {
        KeypadKey::Key1 => b"1:;<=>?@[\\]^_`{|}~",
        KeypadKey::Key2 => b"abc2ABC",
        KeypadKey::Key3 => b"def3DEF",
        KeypadKey::Key4 => b"ghi4GHI",
        KeypadKey::Key5 => b"jkl5JKL",
        KeypadKey::Key6 => b"mno6MNO",
        KeypadKey::Key7 => b"pqrs7PQRS",
        KeypadKey::Key8 => b"tuv8TUV",
        KeypadKey::Key9 => b"wxyz9WXYZ",
        KeypadKey::Key0 => b"0 !\"#$%&'()*+,-./",
        _ => return None,
    };
    Some(glyphs)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn glyph(key: KeypadKey, taps: usize) -> Option<char> {
        let glyphs = glyphs(key)?;
        Some(glyphs[taps % glyphs.len()] as char)
    }

    #[test]
    fn digit_follows_lowercase_run() {
        let cycle: String = (0..4).filter_map(|taps| glyph(KeypadKey::Key2, taps)).collect();
        assert_eq!(cycle, "abc2");
        assert_eq!(glyph(KeypadKey::Key7, 4), Some('7'));
        assert_eq!(glyph(KeypadKey::Key9, 4), Some('9'));
    }

    #[test]
    fn cycles_wrap() {
        assert_eq!(glyph(KeypadKey::Key2, 7), Some('a'));
        assert_eq!(glyphs(KeypadKey::Key1).map(<[u8]>::len), Some(18));
        assert_eq!(glyphs(KeypadKey::Key0).map(<[u8]>::len), Some(17));
    }

    #[test]
    fn navigation_keys_have_no_glyphs() {
        assert_eq!(glyphs(KeypadKey::KeyHash), None);
        assert_eq!(glyphs(KeypadKey::KeyAsterisk), None);
        assert_eq!(glyphs(KeypadKey::KeyA), None);
    }
}
