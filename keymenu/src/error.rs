use thiserror::Error;
use keymenu_gpio::GpioError;
use crate::config::ConfigError;
use crate::display::DisplayError;
use crate::menu::MenuError;
use crate::timer::TimerError;

/// Anything that can stop the firmware from starting.
#[derive(Debug, Error)]
pub enum KeymenuError {
    #[error("menu: {0}")]
    Menu(#[from] MenuError),
    #[error("timer: {0}")]
    Timer(#[from] TimerError),
    #[error("display: {0}")]
    Display(#[from] DisplayError),
    #[error("config: {0}")]
    Config(#[from] ConfigError),
    #[error("hardware: {0}")]
    Gpio(#[from] GpioError),
}
