//! Keypad-driven menu firmware core: software timers, event dispatch, keypad debouncing, the LCD
//! adapter and the menu engine.

pub mod app;
pub mod config;
pub mod debounce;
pub mod display;
pub mod error;
pub mod events;
pub mod menu;
pub mod timer;
