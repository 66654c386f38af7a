use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime, PrimitiveDateTime};
use crate::GpioResult;
use crate::rtc::{RtcDateTime, RtcDriver};

/// Value stored in the backup domain once the clock has been set.
pub const CONFIGURED_MARKER: u32 = 0x5555_5555;

/// Battery-backed state that survives power cycles.
#[derive(Serialize, Deserialize, Debug, Default, Clone, Copy)]
struct BackupDomain {
    marker: u32,
    /// Clock value minus host UTC.
    offset_seconds: i64,
    /// Days from the computed weekday to the set weekday.
    weekday_shift: u8,
}

/// A clock running off the host's clock, with its backup domain kept in a JSON file.
#[derive(Debug)]
pub struct SystemRtc {
    path: PathBuf,
    backup: BackupDomain,
    first_boot: bool,
}

impl SystemRtc {
    /// Opens the clock stored at `path`.
    ///
    /// A missing, unreadable or unmarked state file counts as a first boot, after which the clock
    /// is set to [RtcDateTime::FIRST_BOOT] and the state file is written.
    ///
    /// # Errors
    /// - `GpioError::Io` if the state file cannot be written.
    pub fn open(path: impl Into<PathBuf>) -> GpioResult<Self> {
        let path = path.into();
        let backup = Self::load(&path).unwrap_or_default();
        let mut rtc = SystemRtc {
            path,
            backup,
            first_boot: backup.marker != CONFIGURED_MARKER,
        };

        if rtc.first_boot {
            info!("RTC at {:?} not configured, starting from {:?}.", rtc.path, RtcDateTime::FIRST_BOOT);
            rtc.set_date_time(RtcDateTime::FIRST_BOOT)?;
        } else {
            debug!("RTC restored from {:?}.", rtc.path);
        }

        Ok(rtc)
    }

    /// Whether the clock had to be initialized when it was opened.
    pub fn is_first_boot(&self) -> bool {
        self.first_boot
    }

    fn load(path: &Path) -> Option<BackupDomain> {
        let file = File::open(path).ok()?;
        match serde_json::from_reader(BufReader::new(file)) {
            Ok(backup) => Some(backup),
            Err(e) => {
                warn!("Ignoring corrupt RTC state in {:?}: {}", path, e);
                None
            }
        }
    }

    fn save(&self) -> GpioResult<()> {
        let file = File::create(&self.path)?;
        serde_json::to_writer(BufWriter::new(file), &self.backup)?;
        Ok(())
    }

    fn host_now() -> PrimitiveDateTime {
        let now = OffsetDateTime::now_utc();
        PrimitiveDateTime::new(now.date(), now.time())
    }
}

impl RtcDriver for SystemRtc {
    fn date_time(&self) -> GpioResult<RtcDateTime> {
        let now = Self::host_now() + Duration::seconds(self.backup.offset_seconds);
        let weekday = now.weekday().nth_next(self.backup.weekday_shift);
        Ok(RtcDateTime::from_primitive(now, weekday))
    }

    fn set_date_time(&mut self, value: RtcDateTime) -> GpioResult<()> {
        let target = value.to_primitive()?;
        let computed = target.weekday().number_days_from_monday();
        let wanted = value.weekday.number_days_from_monday();

        self.backup = BackupDomain {
            marker: CONFIGURED_MARKER,
            offset_seconds: (target - Self::host_now()).whole_seconds(),
            weekday_shift: (wanted + 7 - computed) % 7,
        };
        self.save()?;
        info!("RTC set to {:?}.", value);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use time::Weekday;

    fn state_file(name: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!("keymenu-rtc-{}-{}.json", name, std::process::id()));
        let _ = fs::remove_file(&path);
        path
    }

    #[test]
    fn first_boot_writes_marker() {
        let path = state_file("first-boot");
        let rtc = SystemRtc::open(&path).expect("open rtc");
        assert!(rtc.is_first_boot());

        let now = rtc.date_time().expect("read rtc");
        assert_eq!((now.year, now.month, now.day, now.hour), (1, 1, 1, 0));
        assert_eq!(now.weekday, Weekday::Monday);

        let reopened = SystemRtc::open(&path).expect("reopen rtc");
        assert!(!reopened.is_first_boot());
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn set_value_survives_reopen() {
        let path = state_file("persist");
        let mut rtc = SystemRtc::open(&path).expect("open rtc");
        let value = RtcDateTime { year: 25, month: 5, day: 20, hour: 23, minute: 0, second: 0, weekday: Weekday::Sunday };
        rtc.set_date_time(value).expect("set rtc");

        let reopened = SystemRtc::open(&path).expect("reopen rtc");
        let now = reopened.date_time().expect("read rtc");
        assert_eq!((now.year, now.month, now.day, now.hour), (25, 5, 20, 23));
        // 2025-05-20 is a Tuesday, but the weekday set by the user wins
        assert_eq!(now.weekday, Weekday::Sunday);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn corrupt_state_counts_as_first_boot() {
        let path = state_file("corrupt");
        fs::write(&path, "not json").expect("write state");
        let rtc = SystemRtc::open(&path).expect("open rtc");
        assert!(rtc.is_first_boot());
        let _ = fs::remove_file(&path);
    }
}
