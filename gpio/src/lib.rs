pub mod keypad;
pub mod lcd;
pub mod rtc;

use std::fmt::Debug;
use thiserror::Error;

#[derive(Debug, Error, Eq, PartialEq, Clone)]
pub enum GpioError {
    #[error("invalid argument")]
    InvalidArgument,
    #[error("the feature is not supported on this backend")]
    NotSupported,
    #[error("timed out waiting for the device")]
    Timeout,
    #[error("IO error: {0}")]
    Io(std::io::ErrorKind),
    #[error("error: {0}")]
    Other(String),
}

impl From<std::io::Error> for GpioError {
    fn from(err: std::io::Error) -> Self {
        GpioError::Io(err.kind())
    }
}

impl From<serde_json::Error> for GpioError {
    fn from(err: serde_json::Error) -> Self {
        GpioError::Other(err.to_string())
    }
}

pub type GpioResult<T> = Result<T, GpioError>;

/// Specifies the active level of a GPIO line.
///
/// By default, the active level is high.
///
/// Matrix keypads are usually wired active-low: columns are pulled low to select them and a pressed
/// key pulls its row low against the pull-up.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum GpioActiveLevel {
    #[default] High,
    Low,
}

impl GpioActiveLevel {
    /// Converts between the logical (active/inactive) state and the electrical level on the line.
    ///
    /// The conversion is its own inverse, so it is used for both reading and writing.
    pub fn get_state(&self, value: bool) -> bool {
        match self {
            GpioActiveLevel::High => value,
            GpioActiveLevel::Low => !value,
        }
    }
}

pub trait GpioBusInput<const N: usize>: Debug + Send {
    /// Reads the electrical level of every line in the bus.
    fn read(&self) -> GpioResult<[bool; N]>;
}

pub trait GpioBusOutput<const N: usize>: Debug + Send {
    /// Drives every line in the bus.
    fn write(&self, values: &[bool; N]) -> GpioResult<()>;
}
