use std::env::var_os;
use std::ffi::OsString;
use std::path::PathBuf;
use serde::{Serialize, Deserialize};
use thiserror::Error;
use crate::debounce::DEFAULT_DEBOUNCE_TICKS;
use crate::display::Hd44780Timing;
use crate::menu::multitap::DEFAULT_TIMEOUT_TICKS;
use crate::menu::parse_password;

/// Environment variable overriding the config file location.
pub const CONFIG_FILE_VAR: &str = "KEYMENU_CONFIG_FILE";
const DEFAULT_CONFIG_FILE: &str = "config.json";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("the password must be exactly 6 digits")]
    InvalidPassword,
    #[error("{0} must not be zero")]
    Zero(&'static str),
    #[error("could not write the config: {0}")]
    Io(#[from] std::io::Error),
    #[error("could not encode the config: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Serialize, Deserialize, Debug, Clone, Eq, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Six-digit password guarding the menus.
    pub password: String,
    /// Length of one timer tick, in microseconds.
    pub tick_period_us: u64,
    pub debounce_ticks: u32,
    pub multi_tap_timeout_ticks: u32,
    pub busy_flag_timeout_ticks: u32,
    pub power_on_delay_ticks: u32,
    pub function_set_delay_ticks: u32,
    /// Sleep between two passes over the event flags.
    pub poll_interval_ms: u64,
    /// How long a key typed into the simulator stays pressed.
    pub key_hold_ms: u64,
    /// Where the simulated RTC keeps its state.
    pub rtc_state_file: PathBuf,
}

fn config_path() -> PathBuf {
    PathBuf::from(var_os(CONFIG_FILE_VAR).unwrap_or_else(|| OsString::from(DEFAULT_CONFIG_FILE)))
}

impl Config {
    /// Loads the config file, returning `None` if it is missing or unreadable.
    pub fn try_load() -> Option<Self> {
        let config_path = config_path();
        if config_path.exists() {
            let file = std::fs::File::open(config_path).ok()?;
            let reader = std::io::BufReader::new(file);
            serde_json::from_reader(reader).ok()
        } else {
            None
        }
    }

    pub fn save(&self) -> Result<(), ConfigError> {
        let file = std::fs::File::create(config_path())?;
        let writer = std::io::BufWriter::new(file);
        serde_json::to_writer_pretty(writer, self)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if parse_password(&self.password).is_none() {
            return Err(ConfigError::InvalidPassword);
        }
        let periods = [
            ("tick_period_us", self.tick_period_us),
            ("debounce_ticks", self.debounce_ticks as u64),
            ("multi_tap_timeout_ticks", self.multi_tap_timeout_ticks as u64),
            ("busy_flag_timeout_ticks", self.busy_flag_timeout_ticks as u64),
        ];
        match periods.into_iter().find(|(_, value)| *value == 0) {
            Some((name, _)) => Err(ConfigError::Zero(name)),
            None => Ok(()),
        }
    }

    pub fn lcd_timing(&self) -> Hd44780Timing {
        Hd44780Timing {
            power_on_ticks: self.power_on_delay_ticks,
            function_set_ticks: self.function_set_delay_ticks,
            busy_timeout_ticks: self.busy_flag_timeout_ticks,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            password: "123456".to_string(),
            tick_period_us: 1000,
            debounce_ticks: DEFAULT_DEBOUNCE_TICKS,
            multi_tap_timeout_ticks: DEFAULT_TIMEOUT_TICKS,
            busy_flag_timeout_ticks: 10,
            power_on_delay_ticks: 16,
            function_set_delay_ticks: 5,
            poll_interval_ms: 5,
            key_hold_ms: 80,
            rtc_state_file: PathBuf::from("rtc.json"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.lcd_timing(), Hd44780Timing::default());
    }

    #[test]
    fn missing_fields_take_defaults() {
        let config: Config = serde_json::from_str(r#"{ "password": "654321", "debounce_ticks": 20 }"#)
            .expect("parse");
        assert_eq!(config.password, "654321");
        assert_eq!(config.debounce_ticks, 20);
        assert_eq!(config.multi_tap_timeout_ticks, 1500);
        assert_eq!(config.rtc_state_file, PathBuf::from("rtc.json"));
    }

    #[test]
    fn bad_values_are_reported() {
        let config = Config { password: "1234".to_string(), ..Config::default() };
        assert!(matches!(config.validate(), Err(ConfigError::InvalidPassword)));

        let config = Config { debounce_ticks: 0, ..Config::default() };
        assert!(matches!(config.validate(), Err(ConfigError::Zero("debounce_ticks"))));
    }
}
