//! Weekly business-hours schedule with overnight wraparound.

use chrono::{DateTime, Datelike, NaiveTime, TimeZone, Timelike, Weekday};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Open/close times for one day. `close` earlier than or equal to `open`
/// means the shift wraps past midnight into the next day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DaySchedule {
    #[serde(with = "hhmm")]
    pub open: NaiveTime,
    #[serde(with = "hhmm")]
    pub close: NaiveTime,
}

/// Times serialize as "HH:MM"; "HH:MM:SS" is accepted on input.
mod hhmm {
    use chrono::NaiveTime;
    use serde::{Deserialize, Deserializer, Serializer, de};

    pub fn serialize<S: Serializer>(time: &NaiveTime, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&time.format("%H:%M").to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveTime, D::Error> {
        let s = String::deserialize(deserializer)?;
        NaiveTime::parse_from_str(&s, "%H:%M")
            .or_else(|_| NaiveTime::parse_from_str(&s, "%H:%M:%S"))
            .map_err(|_| de::Error::custom(format!("invalid time of day: {s:?}")))
    }
}

impl DaySchedule {
    fn wraps_overnight(&self) -> bool {
        self.close <= self.open
    }
}

/// Seven optional day schedules. A missing day is closed all day.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeeklySchedule {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mon: Option<DaySchedule>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tue: Option<DaySchedule>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wed: Option<DaySchedule>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thu: Option<DaySchedule>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fri: Option<DaySchedule>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sat: Option<DaySchedule>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sun: Option<DaySchedule>,
}

impl WeeklySchedule {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(json).map_err(|e| ConfigError::InvalidValue {
            key: "business_hours".into(),
            message: e.to_string(),
        })
    }

    pub fn day(&self, weekday: Weekday) -> Option<DaySchedule> {
        match weekday {
            Weekday::Mon => self.mon,
            Weekday::Tue => self.tue,
            Weekday::Wed => self.wed,
            Weekday::Thu => self.thu,
            Weekday::Fri => self.fri,
            Weekday::Sat => self.sat,
            Weekday::Sun => self.sun,
        }
    }

    /// Whether the business is open at the given local time. An overnight
    /// shift counts both its evening portion (today) and its early-morning
    /// spill from yesterday's schedule.
    pub fn is_open_at<Tz: TimeZone>(&self, local: &DateTime<Tz>) -> bool {
        let time = NaiveTime::from_hms_opt(local.hour(), local.minute(), local.second())
            .unwrap_or(NaiveTime::MIN);
        let today = local.weekday();

        if let Some(day) = self.day(today) {
            if day.wraps_overnight() {
                if time >= day.open {
                    return true;
                }
            } else if time >= day.open && time < day.close {
                return true;
            }
        }

        // Yesterday's overnight shift spilling past midnight into today.
        if let Some(yesterday) = self.day(today.pred()) {
            if yesterday.wraps_overnight() && time < yesterday.close {
                return true;
            }
        }

        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn schedule(json: &str) -> WeeklySchedule {
        WeeklySchedule::from_json(json).unwrap()
    }

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        use chrono::TimeZone;
        Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    #[test]
    fn accepts_hh_mm_and_hh_mm_ss() {
        let short = schedule(r#"{"mon": {"open": "09:00", "close": "17:00"}}"#);
        let long = schedule(r#"{"mon": {"open": "09:00:00", "close": "17:00:00"}}"#);
        assert_eq!(short, long);
        assert!(serde_json::to_string(&short).unwrap().contains("09:00"));
    }

    #[test]
    fn normal_day_boundaries() {
        // 2025-06-02 is a Monday.
        let s = schedule(r#"{"mon": {"open": "09:00", "close": "17:00"}}"#);
        assert!(!s.is_open_at(&at(2025, 6, 2, 8, 59)));
        assert!(s.is_open_at(&at(2025, 6, 2, 9, 0)));
        assert!(s.is_open_at(&at(2025, 6, 2, 16, 59)));
        // Close time itself is closed.
        assert!(!s.is_open_at(&at(2025, 6, 2, 17, 0)));
    }

    #[test]
    fn missing_day_is_closed() {
        let s = schedule(r#"{"mon": {"open": "09:00:00", "close": "17:00:00"}}"#);
        // Tuesday has no entry.
        assert!(!s.is_open_at(&at(2025, 6, 3, 12, 0)));
    }

    #[test]
    fn overnight_shift_wraps_into_next_day() {
        // Friday 22:00 through Saturday 02:00.
        let s = schedule(r#"{"fri": {"open": "22:00:00", "close": "02:00:00"}}"#);
        // 2025-06-06 is a Friday.
        assert!(!s.is_open_at(&at(2025, 6, 6, 21, 59)));
        assert!(s.is_open_at(&at(2025, 6, 6, 23, 30)));
        // Saturday early morning falls under Friday's shift.
        assert!(s.is_open_at(&at(2025, 6, 7, 1, 59)));
        assert!(!s.is_open_at(&at(2025, 6, 7, 2, 0)));
        assert!(!s.is_open_at(&at(2025, 6, 7, 12, 0)));
    }

    #[test]
    fn empty_schedule_always_closed() {
        let s = WeeklySchedule::default();
        assert!(!s.is_open_at(&at(2025, 6, 2, 12, 0)));
    }
}
