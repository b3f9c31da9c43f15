use std::fmt;
use std::str::FromStr;

use chrono::{Days, NaiveDate, NaiveTime, TimeDelta};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::schedule::DoseSlot;

/// Upper bound on doses in a single day.
pub const MAX_TIMES_PER_DAY: u32 = 24;

/// Upper bound on dosing days in one plan, about ten years.
pub const MAX_TOTAL_DAYS: u32 = 3660;

/// Calendar stride between dosing days.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Frequency {
    Daily,
    EveryOtherDay,
}

impl Frequency {
    pub fn stride_days(self) -> u64 {
        match self {
            Frequency::Daily => 1,
            Frequency::EveryOtherDay => 2,
        }
    }
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Frequency::Daily => write!(f, "Daily"),
            Frequency::EveryOtherDay => write!(f, "Every other day"),
        }
    }
}

impl FromStr for Frequency {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "daily" | "every day" => Ok(Frequency::Daily),
            "every other day" | "every-other-day" | "alternate" | "every 2 days" => {
                Ok(Frequency::EveryOtherDay)
            }
            other => Err(Error::Validation(format!(
                "unknown frequency '{}' (expected 'daily' or 'every other day')",
                other
            ))),
        }
    }
}

/// How the times within one dosing day are chosen.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Timing {
    /// `start_time`, then every `every_hours` on the wall clock.
    Interval {
        every_hours: u32,
        start_time: NaiveTime,
    },
    /// Caller-supplied times, used in the given order.
    Explicit { times: Vec<NaiveTime> },
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct DoseInstruction {
    pub times_per_day: u32,
    pub total_days: u32,
    pub frequency: Frequency,
    pub start_date: NaiveDate,
    pub timing: Timing,
}

impl DoseInstruction {
    /// Checks every numeric field before anything is generated.
    pub fn validate(&self) -> Result<()> {
        if self.times_per_day < 1 {
            return Err(Error::Validation(
                "times per day must be at least 1".to_string(),
            ));
        }
        if self.total_days < 1 {
            return Err(Error::Validation(
                "total days must be at least 1".to_string(),
            ));
        }
        if self.times_per_day > MAX_TIMES_PER_DAY {
            return Err(Error::Validation(format!(
                "times per day must be at most {}",
                MAX_TIMES_PER_DAY
            )));
        }
        if self.total_days > MAX_TOTAL_DAYS {
            return Err(Error::Validation(format!(
                "total days must be at most {}",
                MAX_TOTAL_DAYS
            )));
        }

        match &self.timing {
            Timing::Interval { every_hours, .. } if *every_hours < 1 => {
                return Err(Error::Validation(
                    "interval must be at least 1 hour".to_string(),
                ));
            }
            Timing::Explicit { times } if times.len() > self.times_per_day as usize => {
                return Err(Error::Validation(format!(
                    "{} time slots given but only {} doses per day",
                    times.len(),
                    self.times_per_day
                )));
            }
            _ => {}
        }

        if self.last_dosing_day().is_none() {
            return Err(Error::Validation(
                "dosing period runs past the end of the calendar".to_string(),
            ));
        }

        Ok(())
    }

    pub fn expected_slot_count(&self) -> usize {
        self.times_per_day as usize * self.total_days as usize
    }

    /// Times of day for a single dosing day, in administration order.
    ///
    /// Interval times wrap at midnight without moving to the next date.
    pub fn daily_times(&self) -> Vec<NaiveTime> {
        match &self.timing {
            Timing::Interval {
                every_hours,
                start_time,
            } => (0..u64::from(self.times_per_day))
                .map(|i| {
                    let hours = (i * u64::from(*every_hours)) % 24;
                    let (time, _) =
                        start_time.overflowing_add_signed(TimeDelta::hours(hours as i64));
                    time
                })
                .collect(),
            Timing::Explicit { times } => times.clone(),
        }
    }

    /// Calendar dates of every dosing day, starting at `start_date`.
    pub fn dosing_days(&self) -> Vec<NaiveDate> {
        let stride = self.frequency.stride_days();
        (0..u64::from(self.total_days))
            .filter_map(|day| self.start_date.checked_add_days(Days::new(day * stride)))
            .collect()
    }

    fn last_dosing_day(&self) -> Option<NaiveDate> {
        let offset = u64::from(self.total_days.saturating_sub(1)) * self.frequency.stride_days();
        self.start_date.checked_add_days(Days::new(offset))
    }

    /// Short human summary, e.g. "3 times a day for 7 days, Daily, from 2024-01-01".
    pub fn summary(&self) -> String {
        format!(
            "{} times a day for {} days, {}, from {}",
            self.times_per_day, self.total_days, self.frequency, self.start_date
        )
    }
}

/// Expands a dosing plan into one untaken slot per (day, time).
///
/// Slots are grouped by ascending day; within a day they follow
/// [`DoseInstruction::daily_times`]. Nothing is produced if validation fails.
pub fn expand(medication_id: u64, instruction: &DoseInstruction) -> Result<Vec<DoseSlot>> {
    instruction.validate()?;

    let times = instruction.daily_times();
    let days = instruction.dosing_days();
    if times.len() * days.len() < instruction.expected_slot_count() {
        log::warn!(
            "medication {}: {} time slot(s) for {} doses per day, days will be short",
            medication_id,
            times.len(),
            instruction.times_per_day
        );
    }

    let mut slots = Vec::with_capacity(days.len() * times.len());
    for day in days {
        for (dose, time) in (0u32..).zip(&times) {
            let mut slot = DoseSlot::new(medication_id, day, *time);
            slot.dose = dose;
            slots.push(slot);
        }
    }

    Ok(slots)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn hm(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn explicit(frequency: Frequency) -> DoseInstruction {
        DoseInstruction {
            times_per_day: 2,
            total_days: 3,
            frequency,
            start_date: date(2024, 1, 1),
            timing: Timing::Explicit {
                times: vec![hm(8, 0), hm(20, 0)],
            },
        }
    }

    fn pairs(slots: &[DoseSlot]) -> Vec<(NaiveDate, NaiveTime)> {
        slots
            .iter()
            .map(|s| (s.day.unwrap(), s.time.unwrap()))
            .collect()
    }

    #[test]
    fn test_interval_times() {
        let instruction = DoseInstruction {
            times_per_day: 3,
            total_days: 1,
            frequency: Frequency::Daily,
            start_date: date(2024, 1, 1),
            timing: Timing::Interval {
                every_hours: 6,
                start_time: hm(8, 0),
            },
        };
        assert_eq!(instruction.daily_times(), vec![hm(8, 0), hm(14, 0), hm(20, 0)]);
    }

    #[test]
    fn test_interval_wraps_past_midnight() {
        let instruction = DoseInstruction {
            times_per_day: 3,
            total_days: 2,
            frequency: Frequency::Daily,
            start_date: date(2024, 1, 1),
            timing: Timing::Interval {
                every_hours: 8,
                start_time: hm(22, 30),
            },
        };
        assert_eq!(
            instruction.daily_times(),
            vec![hm(22, 30), hm(6, 30), hm(14, 30)]
        );

        // Wrapped times stay on the same dosing day
        let slots = expand(1, &instruction).unwrap();
        assert_eq!(slots[1].day, Some(date(2024, 1, 1)));
        assert_eq!(slots[3].day, Some(date(2024, 1, 2)));
    }

    #[test]
    fn test_expand_daily_explicit() {
        let slots = expand(7, &explicit(Frequency::Daily)).unwrap();
        assert_eq!(
            pairs(&slots),
            vec![
                (date(2024, 1, 1), hm(8, 0)),
                (date(2024, 1, 1), hm(20, 0)),
                (date(2024, 1, 2), hm(8, 0)),
                (date(2024, 1, 2), hm(20, 0)),
                (date(2024, 1, 3), hm(8, 0)),
                (date(2024, 1, 3), hm(20, 0)),
            ]
        );
        assert!(slots.iter().all(|s| s.medication_id == 7 && !s.taken));
    }

    #[test]
    fn test_expand_every_other_day() {
        let slots = expand(7, &explicit(Frequency::EveryOtherDay)).unwrap();
        let days: Vec<NaiveDate> = slots.iter().map(|s| s.day.unwrap()).collect();
        assert_eq!(
            days,
            vec![
                date(2024, 1, 1),
                date(2024, 1, 1),
                date(2024, 1, 3),
                date(2024, 1, 3),
                date(2024, 1, 5),
                date(2024, 1, 5),
            ]
        );
    }

    #[test]
    fn test_explicit_order_is_kept() {
        let mut instruction = explicit(Frequency::Daily);
        instruction.timing = Timing::Explicit {
            times: vec![hm(20, 0), hm(8, 0)],
        };
        let slots = expand(1, &instruction).unwrap();
        assert_eq!(slots[0].time, Some(hm(20, 0)));
        assert_eq!(slots[1].time, Some(hm(8, 0)));
    }

    #[test]
    fn test_short_explicit_list_produces_short_days() {
        let mut instruction = explicit(Frequency::Daily);
        instruction.times_per_day = 3;
        let slots = expand(1, &instruction).unwrap();
        assert_eq!(slots.len(), 6);

        instruction.timing = Timing::Explicit { times: vec![] };
        assert!(expand(1, &instruction).unwrap().is_empty());
    }

    #[test]
    fn test_validation_fails_closed() {
        let mut instruction = explicit(Frequency::Daily);
        instruction.times_per_day = 0;
        assert!(matches!(expand(1, &instruction), Err(Error::Validation(_))));

        let mut instruction = explicit(Frequency::Daily);
        instruction.total_days = 0;
        assert!(matches!(expand(1, &instruction), Err(Error::Validation(_))));

        let mut instruction = explicit(Frequency::Daily);
        instruction.timing = Timing::Interval {
            every_hours: 0,
            start_time: hm(8, 0),
        };
        assert!(matches!(expand(1, &instruction), Err(Error::Validation(_))));

        // More times than doses per day
        let mut instruction = explicit(Frequency::Daily);
        instruction.times_per_day = 1;
        assert!(matches!(expand(1, &instruction), Err(Error::Validation(_))));
    }

    #[test]
    fn test_oversized_plan_rejected() {
        let mut instruction = explicit(Frequency::Daily);
        instruction.times_per_day = 4_000_000_000;
        instruction.timing = Timing::Interval {
            every_hours: 1,
            start_time: hm(8, 0),
        };
        assert!(matches!(expand(1, &instruction), Err(Error::Validation(_))));

        instruction.times_per_day = MAX_TIMES_PER_DAY;
        assert_eq!(expand(1, &instruction).unwrap().len(), 24 * 3);

        let mut instruction = explicit(Frequency::Daily);
        instruction.total_days = MAX_TOTAL_DAYS + 1;
        assert!(matches!(expand(1, &instruction), Err(Error::Validation(_))));
    }

    #[test]
    fn test_repeated_times_get_own_positions() {
        let mut instruction = explicit(Frequency::Daily);
        instruction.total_days = 2;
        instruction.timing = Timing::Explicit {
            times: vec![hm(8, 0), hm(8, 0)],
        };
        let slots = expand(1, &instruction).unwrap();
        assert_eq!(slots.len(), 4);

        let doses: Vec<u32> = slots.iter().map(|s| s.dose).collect();
        assert_eq!(doses, vec![0, 1, 0, 1]);
        assert_ne!(slots[0].key(), slots[1].key());
    }

    #[test]
    fn test_calendar_overflow_rejected() {
        let mut instruction = explicit(Frequency::EveryOtherDay);
        instruction.start_date = NaiveDate::MAX;
        assert!(matches!(expand(1, &instruction), Err(Error::Validation(_))));
    }

    #[test]
    fn test_frequency_parsing() {
        assert_eq!("Daily".parse::<Frequency>().unwrap(), Frequency::Daily);
        assert_eq!(
            "Every other day".parse::<Frequency>().unwrap(),
            Frequency::EveryOtherDay
        );
        assert_eq!(
            " every-other-day ".parse::<Frequency>().unwrap(),
            Frequency::EveryOtherDay
        );
        assert!("weekly".parse::<Frequency>().is_err());
        assert_eq!(Frequency::EveryOtherDay.to_string(), "Every other day");
    }

    #[test]
    fn test_summary() {
        assert_eq!(
            explicit(Frequency::Daily).summary(),
            "2 times a day for 3 days, Daily, from 2024-01-01"
        );
    }

    proptest! {
        #[test]
        fn prop_interval_slot_count(
            times_per_day in 1u32..12,
            total_days in 1u32..60,
            every_hours in 1u32..48,
            start_hour in 0u32..24,
            every_other in any::<bool>(),
        ) {
            let frequency = if every_other { Frequency::EveryOtherDay } else { Frequency::Daily };
            let instruction = DoseInstruction {
                times_per_day,
                total_days,
                frequency,
                start_date: date(2024, 2, 27),
                timing: Timing::Interval { every_hours, start_time: hm(start_hour, 0) },
            };
            let slots = expand(3, &instruction).unwrap();
            prop_assert_eq!(slots.len(), instruction.expected_slot_count());
            prop_assert_eq!(slots[0].day, Some(instruction.start_date));

            let days = instruction.dosing_days();
            for pair in days.windows(2) {
                prop_assert_eq!((pair[1] - pair[0]).num_days(), frequency.stride_days() as i64);
            }
        }

        #[test]
        fn prop_explicit_slot_count(
            hours in proptest::collection::vec(0u32..24, 1..8),
            total_days in 1u32..30,
        ) {
            let times: Vec<NaiveTime> = hours.iter().map(|h| hm(*h, 0)).collect();
            let instruction = DoseInstruction {
                times_per_day: times.len() as u32,
                total_days,
                frequency: Frequency::Daily,
                start_date: date(2023, 12, 30),
                timing: Timing::Explicit { times },
            };
            let slots = expand(3, &instruction).unwrap();
            prop_assert_eq!(slots.len(), instruction.expected_slot_count());
        }
    }
}
