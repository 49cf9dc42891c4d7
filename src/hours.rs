//! Working-hours policy: per-weekday open/close windows plus a vacation
//! exclusion range. Pure configuration and arithmetic — no engine state.

use std::collections::HashMap;

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::model::Minutes;

pub const MINUTES_PER_DAY: Minutes = 24 * 60;

/// Open/close window of one weekday.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DayConfig {
    pub is_open: bool,
    pub open: Minutes,
    pub close: Minutes,
}

/// Inclusive day range during which the whole salon is closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Vacation {
    pub enabled: bool,
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
}

/// The singleton schedule configuration. `days` is indexed by weekday with
/// Sunday = 0 through Saturday = 6.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkingHours {
    pub days: [DayConfig; 7],
    pub vacation: Vacation,
}

impl Default for WorkingHours {
    fn default() -> Self {
        let weekday = DayConfig {
            is_open: true,
            open: 540,   // 09:00
            close: 1140, // 19:00
        };
        Self {
            days: [
                DayConfig {
                    is_open: true,
                    open: 600,  // 10:00
                    close: 960, // 16:00
                },
                weekday,
                weekday,
                weekday,
                weekday,
                weekday,
                DayConfig {
                    is_open: true,
                    open: 540,   // 09:00
                    close: 1080, // 18:00
                },
            ],
            vacation: Vacation::default(),
        }
    }
}

impl WorkingHours {
    pub fn day_config(&self, date: NaiveDate) -> &DayConfig {
        &self.days[date.weekday().num_days_from_sunday() as usize]
    }

    pub fn is_on_vacation(&self, date: NaiveDate) -> bool {
        if !self.vacation.enabled {
            return false;
        }
        match (self.vacation.from, self.vacation.to) {
            (Some(from), Some(to)) => from <= date && date <= to,
            _ => false,
        }
    }

    /// Whether `[start, start + duration)` lies inside the day's window.
    pub fn is_within(&self, date: NaiveDate, start: Minutes, duration: Minutes) -> bool {
        let day = self.day_config(date);
        day.is_open && start >= day.open && start + duration <= day.close
    }
}

/// Every `open + k * step` start with `start + step <= close`, ascending.
/// Empty when the day is closed.
pub fn candidate_slots(day: &DayConfig, step: Minutes) -> Vec<Minutes> {
    if !day.is_open || step == 0 {
        return Vec::new();
    }
    let mut slots = Vec::new();
    let mut t = day.open;
    while t + step <= day.close {
        slots.push(t);
        t += step;
    }
    slots
}

/// Lenient `HH:MM` parser for configuration values: malformed components
/// read as 0, the result is clamped to one day. Command inputs are parsed
/// strictly elsewhere; this leniency exists only so a damaged settings
/// document degrades to defaults instead of closing the salon.
pub fn parse_hhmm(value: &str) -> Minutes {
    let mut parts = value.splitn(2, ':');
    let h: u64 = parts.next().and_then(|p| p.trim().parse().ok()).unwrap_or(0);
    let m: u64 = parts.next().and_then(|p| p.trim().parse().ok()).unwrap_or(0);
    (h * 60 + m).min(u64::from(MINUTES_PER_DAY)) as Minutes
}

pub fn format_hhmm(minutes: Minutes) -> String {
    format!("{:02}:{:02}", minutes / 60, minutes % 60)
}

pub fn parse_date(value: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d").ok()
}

// ── Settings document ingest ─────────────────────────────────────

/// Wire form of the settings document as the admin form writes it. Every
/// field may be missing; `normalize` fills the gaps from the defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkingHoursDoc {
    #[serde(default)]
    pub days: HashMap<String, DayDoc>,
    #[serde(default)]
    pub vacation: Option<VacationDoc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DayDoc {
    pub is_open: Option<bool>,
    pub open: Option<String>,
    pub close: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VacationDoc {
    pub enabled: Option<bool>,
    pub from: Option<String>,
    pub to: Option<String>,
}

impl WorkingHoursDoc {
    /// Merge the partial document over the default table. Unknown weekday
    /// keys are skipped, empty time strings count as missing, unparseable
    /// vacation dates disable the bound they belong to.
    pub fn normalize(&self) -> WorkingHours {
        let mut hours = WorkingHours::default();
        for (key, day) in &self.days {
            let Ok(idx) = key.parse::<usize>() else {
                continue;
            };
            if idx >= 7 {
                continue;
            }
            let base = hours.days[idx];
            hours.days[idx] = DayConfig {
                is_open: day.is_open.unwrap_or(base.is_open),
                open: day
                    .open
                    .as_deref()
                    .filter(|s| !s.is_empty())
                    .map(parse_hhmm)
                    .unwrap_or(base.open),
                close: day
                    .close
                    .as_deref()
                    .filter(|s| !s.is_empty())
                    .map(parse_hhmm)
                    .unwrap_or(base.close),
            };
        }
        if let Some(vacation) = &self.vacation {
            hours.vacation = Vacation {
                enabled: vacation.enabled.unwrap_or(false),
                from: vacation.from.as_deref().and_then(parse_date),
                to: vacation.to.as_deref().and_then(parse_date),
            };
        }
        hours
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn default_table_matches_salon_schedule() {
        let hours = WorkingHours::default();
        assert_eq!(hours.days[0].open, parse_hhmm("10:00"));
        assert_eq!(hours.days[0].close, parse_hhmm("16:00"));
        assert_eq!(hours.days[1].close, parse_hhmm("19:00"));
        assert_eq!(hours.days[6].close, parse_hhmm("18:00"));
        assert!(hours.days.iter().all(|d| d.is_open));
        assert!(!hours.vacation.enabled);
    }

    #[test]
    fn day_config_maps_sunday_to_zero() {
        let hours = WorkingHours::default();
        // 2025-06-08 is a Sunday, 2025-06-10 a Tuesday, 2025-06-14 a Saturday.
        assert_eq!(hours.day_config(date("2025-06-08")).open, 600);
        assert_eq!(hours.day_config(date("2025-06-10")).close, 1140);
        assert_eq!(hours.day_config(date("2025-06-14")).close, 1080);
    }

    #[test]
    fn parse_hhmm_lenient() {
        assert_eq!(parse_hhmm("09:00"), 540);
        assert_eq!(parse_hhmm("19:30"), 1170);
        assert_eq!(parse_hhmm("garbage"), 0);
        assert_eq!(parse_hhmm("x:30"), 30);
        assert_eq!(parse_hhmm("10:x"), 600);
        assert_eq!(parse_hhmm(""), 0);
        assert_eq!(parse_hhmm("99:00"), MINUTES_PER_DAY);
    }

    #[test]
    fn format_hhmm_pads() {
        assert_eq!(format_hhmm(540), "09:00");
        assert_eq!(format_hhmm(575), "09:35");
        assert_eq!(format_hhmm(0), "00:00");
    }

    #[test]
    fn candidate_slots_respect_close() {
        let day = DayConfig {
            is_open: true,
            open: 540,
            close: 720,
        };
        assert_eq!(candidate_slots(&day, 30), vec![540, 570, 600, 630, 660, 690]);
        // A slot must fit entirely before close.
        let short = DayConfig {
            is_open: true,
            open: 540,
            close: 585,
        };
        assert_eq!(candidate_slots(&short, 30), vec![540]);
    }

    #[test]
    fn candidate_slots_closed_day_empty() {
        let day = DayConfig {
            is_open: false,
            open: 540,
            close: 1140,
        };
        assert!(candidate_slots(&day, 30).is_empty());
    }

    #[test]
    fn vacation_bounds_inclusive() {
        let hours = WorkingHours {
            vacation: Vacation {
                enabled: true,
                from: Some(date("2025-07-01")),
                to: Some(date("2025-07-10")),
            },
            ..WorkingHours::default()
        };
        assert!(hours.is_on_vacation(date("2025-07-01")));
        assert!(hours.is_on_vacation(date("2025-07-05")));
        assert!(hours.is_on_vacation(date("2025-07-10")));
        assert!(!hours.is_on_vacation(date("2025-06-30")));
        assert!(!hours.is_on_vacation(date("2025-07-11")));
    }

    #[test]
    fn vacation_disabled_or_unbounded_is_ignored() {
        let mut hours = WorkingHours::default();
        assert!(!hours.is_on_vacation(date("2025-07-05")));
        hours.vacation.enabled = true;
        hours.vacation.from = Some(date("2025-07-01"));
        // Missing `to` — range never matches.
        assert!(!hours.is_on_vacation(date("2025-07-05")));
    }

    #[test]
    fn is_within_boundary() {
        let hours = WorkingHours::default();
        let tuesday = date("2025-06-10"); // 09:00-19:00
        assert!(hours.is_within(tuesday, 540, 30));
        assert!(hours.is_within(tuesday, 1110, 30)); // ends exactly at close
        assert!(!hours.is_within(tuesday, 1111, 30));
        assert!(!hours.is_within(tuesday, 539, 30)); // before open
    }

    #[test]
    fn normalize_empty_doc_yields_defaults() {
        let doc = WorkingHoursDoc::default();
        assert_eq!(doc.normalize(), WorkingHours::default());
    }

    #[test]
    fn normalize_merges_partial_days() {
        let doc: WorkingHoursDoc = serde_json::from_str(
            r#"{
                "days": {
                    "1": { "isOpen": false },
                    "2": { "open": "08:30" },
                    "9": { "open": "00:00" },
                    "x": { "open": "00:00" }
                }
            }"#,
        )
        .unwrap();
        let hours = doc.normalize();
        assert!(!hours.days[1].is_open);
        assert_eq!(hours.days[1].open, 540); // untouched
        assert_eq!(hours.days[2].open, 510);
        assert_eq!(hours.days[2].close, 1140); // untouched
    }

    #[test]
    fn normalize_empty_time_string_falls_back() {
        let doc: WorkingHoursDoc = serde_json::from_str(
            r#"{ "days": { "3": { "open": "", "close": "20:00" } } }"#,
        )
        .unwrap();
        let hours = doc.normalize();
        assert_eq!(hours.days[3].open, 540);
        assert_eq!(hours.days[3].close, 1200);
    }

    #[test]
    fn normalize_vacation() {
        let doc: WorkingHoursDoc = serde_json::from_str(
            r#"{ "vacation": { "enabled": true, "from": "2025-07-01", "to": "2025-07-10" } }"#,
        )
        .unwrap();
        let hours = doc.normalize();
        assert!(hours.vacation.enabled);
        assert_eq!(hours.vacation.from, Some(date("2025-07-01")));

        let bad: WorkingHoursDoc =
            serde_json::from_str(r#"{ "vacation": { "enabled": true, "from": "soon" } }"#).unwrap();
        let hours = bad.normalize();
        assert!(hours.vacation.enabled);
        assert_eq!(hours.vacation.from, None);
        assert!(!hours.is_on_vacation(date("2025-07-05")));
    }
}
