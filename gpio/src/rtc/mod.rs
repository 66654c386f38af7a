//! Real-time clock contract and backends.
//!
//! Years are kept the way calendar RTCs store them: two digits on top of the year 2000.

mod system;

use std::fmt::Debug;
use time::{Date, Month, PrimitiveDateTime, Time, Weekday};
use crate::{GpioError, GpioResult};
pub use system::*;

/// Calendar time as held by the RTC.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct RtcDateTime {
    /// Years since 2000, `0..=99`.
    pub year: u8,
    /// `1..=12`.
    pub month: u8,
    /// `1..=31`, bounded by the month.
    pub day: u8,
    /// `0..=23`.
    pub hour: u8,
    /// `0..=59`.
    pub minute: u8,
    /// `0..=59`.
    pub second: u8,
    /// Kept separately from the date, so it is whatever was last set.
    pub weekday: Weekday,
}

impl RtcDateTime {
    /// The time a clock starts from when it has never been configured: 2001-01-01 00:00:00, Monday.
    pub const FIRST_BOOT: RtcDateTime = RtcDateTime {
        year: 1,
        month: 1,
        day: 1,
        hour: 0,
        minute: 0,
        second: 0,
        weekday: Weekday::Monday,
    };

    /// Converts to a full date and time, checking every field.
    ///
    /// # Errors
    /// - `GpioError::InvalidArgument` if any field is out of range, including days past the end of
    ///   the month.
    pub fn to_primitive(&self) -> GpioResult<PrimitiveDateTime> {
        if self.year > 99 {
            return Err(GpioError::InvalidArgument);
        }
        let month = Month::try_from(self.month).map_err(|_| GpioError::InvalidArgument)?;
        let date = Date::from_calendar_date(2000 + self.year as i32, month, self.day)
            .map_err(|_| GpioError::InvalidArgument)?;
        let time = Time::from_hms(self.hour, self.minute, self.second)
            .map_err(|_| GpioError::InvalidArgument)?;
        Ok(PrimitiveDateTime::new(date, time))
    }

    /// Builds the RTC view of a date and time. The century is dropped.
    pub fn from_primitive(value: PrimitiveDateTime, weekday: Weekday) -> Self {
        RtcDateTime {
            year: value.year().rem_euclid(100) as u8,
            month: value.month() as u8,
            day: value.day(),
            hour: value.hour(),
            minute: value.minute(),
            second: value.second(),
            weekday,
        }
    }
}

pub trait RtcDriver: Debug + Send {
    /// Reads the current calendar time.
    fn date_time(&self) -> GpioResult<RtcDateTime>;

    /// Sets the calendar time. The clock keeps running from the new value.
    ///
    /// # Errors
    /// - `GpioError::InvalidArgument` if the value is not a valid calendar time.
    fn set_date_time(&mut self, value: RtcDateTime) -> GpioResult<()>;
}

/// A clock that does not run, holding whatever was last set.
#[derive(Debug)]
pub struct MemoryRtc {
    value: RtcDateTime,
}

impl MemoryRtc {
    pub fn new(value: RtcDateTime) -> Self {
        MemoryRtc { value }
    }
}

impl Default for MemoryRtc {
    fn default() -> Self {
        MemoryRtc::new(RtcDateTime::FIRST_BOOT)
    }
}

impl RtcDriver for MemoryRtc {
    fn date_time(&self) -> GpioResult<RtcDateTime> {
        Ok(self.value)
    }

    fn set_date_time(&mut self, value: RtcDateTime) -> GpioResult<()> {
        value.to_primitive()?;
        self.value = value;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_boot_value_is_valid() {
        let value = RtcDateTime::FIRST_BOOT.to_primitive().expect("valid date");
        assert_eq!(value.weekday(), Weekday::Monday);
    }

    #[test]
    fn leap_day_only_in_leap_years() {
        let leap = RtcDateTime { year: 24, month: 2, day: 29, ..RtcDateTime::FIRST_BOOT };
        assert!(leap.to_primitive().is_ok());
        let common = RtcDateTime { year: 25, ..leap };
        assert_eq!(common.to_primitive(), Err(GpioError::InvalidArgument));
    }

    #[test]
    fn memory_rtc_rejects_invalid_values() {
        let mut rtc = MemoryRtc::default();
        let bad = RtcDateTime { hour: 24, ..RtcDateTime::FIRST_BOOT };
        assert_eq!(rtc.set_date_time(bad), Err(GpioError::InvalidArgument));
        assert_eq!(rtc.date_time(), Ok(RtcDateTime::FIRST_BOOT));
    }

    #[test]
    fn century_is_dropped() {
        let value = RtcDateTime { year: 99, month: 12, day: 31, hour: 23, minute: 59, second: 59, weekday: Weekday::Friday };
        let next = value.to_primitive().expect("valid") + time::Duration::seconds(1);
        let wrapped = RtcDateTime::from_primitive(next, Weekday::Saturday);
        assert_eq!((wrapped.year, wrapped.month, wrapped.day), (0, 1, 1));
    }
}
