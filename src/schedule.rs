use std::fmt;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime, TimeDelta};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// One scheduled administration of a medication.
///
/// `day` and `time` are optional because stored records may be incomplete;
/// a slot missing either one is malformed and is skipped by batch operations.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct DoseSlot {
    pub medication_id: u64,
    /// Position of this dose within its day.
    #[serde(default)]
    pub dose: u32,
    #[serde(default)]
    pub day: Option<NaiveDate>,
    #[serde(default)]
    pub time: Option<NaiveTime>,
    #[serde(default)]
    pub taken: bool,
    #[serde(default)]
    pub qty_taken: Option<String>,
    #[serde(default)]
    pub time_taken: Option<NaiveDateTime>,
    /// Free-text outcome note, e.g. "Missed: Skipping Dose".
    #[serde(default)]
    pub action: Option<String>,
}

/// Identity of a slot: owning medication, dosing day and dose position.
///
/// Two doses of one day may share a wall-clock time; the position keeps
/// them apart.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotKey {
    pub medication_id: u64,
    pub day: NaiveDate,
    pub dose: u32,
    pub time: NaiveTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleStatus {
    Taken,
    Missed,
    Upcoming,
}

impl fmt::Display for ScheduleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScheduleStatus::Taken => write!(f, "taken"),
            ScheduleStatus::Missed => write!(f, "missed"),
            ScheduleStatus::Upcoming => write!(f, "upcoming"),
        }
    }
}

/// What the user can do next with a slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Affordance {
    MarkTaken,
    ChooseMissedAction,
    ShowNote(String),
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissedDoseAdvice {
    /// Still close to the scheduled time; the dose can be taken now.
    TakeNow,
    /// Too long ago; the next scheduled dose is close.
    WaitForNext,
}

impl MissedDoseAdvice {
    pub fn message(self) -> &'static str {
        match self {
            MissedDoseAdvice::TakeNow => "You can take the missed dose now.",
            MissedDoseAdvice::WaitForNext => {
                "It seems you missed this dose. Since the next dose is close, you may want to take it at the scheduled time."
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissedAction {
    Skip,
    TakeLate,
}

impl MissedAction {
    pub fn note(self) -> &'static str {
        match self {
            MissedAction::Skip => "Missed: Skipping Dose",
            MissedAction::TakeLate => "Missed actual time: Dose taken",
        }
    }
}

impl DoseSlot {
    pub fn new(medication_id: u64, day: NaiveDate, time: NaiveTime) -> Self {
        DoseSlot {
            medication_id,
            dose: 0,
            day: Some(day),
            time: Some(time),
            taken: false,
            qty_taken: None,
            time_taken: None,
            action: None,
        }
    }

    pub fn key(&self) -> Option<SlotKey> {
        Some(SlotKey {
            medication_id: self.medication_id,
            day: self.day?,
            dose: self.dose,
            time: self.time?,
        })
    }

    pub fn scheduled_at(&self) -> Result<NaiveDateTime> {
        match (self.day, self.time) {
            (Some(day), Some(time)) => Ok(day.and_time(time)),
            _ => Err(Error::MalformedSlot {
                medication_id: self.medication_id,
            }),
        }
    }

    pub fn has_outcome(&self) -> bool {
        self.taken || self.action.is_some()
    }

    /// Marks the dose as taken. A slot accepts exactly one outcome.
    pub fn record_taken(&mut self, qty: Option<String>, at: NaiveDateTime) -> Result<()> {
        if self.has_outcome() {
            return Err(Error::OutcomeAlreadyRecorded);
        }
        self.taken = true;
        self.qty_taken = qty;
        self.time_taken = Some(at);
        Ok(())
    }

    /// Records what happened to a missed dose.
    ///
    /// Only a slot that classifies as missed at `at` accepts an action.
    /// Taking it late marks the slot taken and keeps the note alongside.
    pub fn record_missed(
        &mut self,
        action: MissedAction,
        qty: Option<String>,
        at: NaiveDateTime,
    ) -> Result<()> {
        if self.has_outcome() {
            return Err(Error::OutcomeAlreadyRecorded);
        }
        if classify(self, at)? != ScheduleStatus::Missed {
            return Err(Error::NotMissed);
        }
        self.action = Some(action.note().to_string());
        if action == MissedAction::TakeLate {
            self.taken = true;
            self.qty_taken = qty;
            self.time_taken = Some(at);
        }
        Ok(())
    }
}

/// Derives the display status of a slot at `now`.
///
/// `taken` wins over everything else, malformed slots included. Otherwise the
/// slot is missed only once `now` is strictly past the scheduled instant.
pub fn classify(slot: &DoseSlot, now: NaiveDateTime) -> Result<ScheduleStatus> {
    if slot.taken {
        return Ok(ScheduleStatus::Taken);
    }

    let scheduled = slot.scheduled_at()?;
    if now > scheduled {
        Ok(ScheduleStatus::Missed)
    } else {
        Ok(ScheduleStatus::Upcoming)
    }
}

/// Classifies a batch, returning `(index, status)` for each well-formed slot.
pub fn classify_all(slots: &[DoseSlot], now: NaiveDateTime) -> Vec<(usize, ScheduleStatus)> {
    slots
        .iter()
        .enumerate()
        .filter_map(|(index, slot)| match classify(slot, now) {
            Ok(status) => Some((index, status)),
            Err(e) => {
                log::warn!("Skipping slot #{}: {}", index, e);
                None
            }
        })
        .collect()
}

pub fn affordance(slot: &DoseSlot, now: NaiveDateTime) -> Result<Affordance> {
    Ok(match classify(slot, now)? {
        ScheduleStatus::Upcoming => Affordance::MarkTaken,
        ScheduleStatus::Missed => match &slot.action {
            Some(note) => Affordance::ShowNote(note.clone()),
            None => Affordance::ChooseMissedAction,
        },
        ScheduleStatus::Taken => Affordance::None,
    })
}

/// Advisory message for a missed slot; `None` if the slot is not missed.
pub fn advise_missed(
    slot: &DoseSlot,
    now: NaiveDateTime,
    threshold: TimeDelta,
) -> Option<MissedDoseAdvice> {
    if classify(slot, now).ok()? != ScheduleStatus::Missed {
        return None;
    }

    let elapsed = now - slot.scheduled_at().ok()?;
    if elapsed > threshold {
        Some(MissedDoseAdvice::WaitForNext)
    } else {
        Some(MissedDoseAdvice::TakeNow)
    }
}

/// Slots scheduled on `day`, in stored order.
pub fn slots_on(slots: &[DoseSlot], day: NaiveDate) -> Vec<&DoseSlot> {
    slots.iter().filter(|s| s.day == Some(day)).collect()
}

/// The untaken slot of a medication on `day` scheduled closest to `now`.
pub fn nearest_open_slot(
    slots: &[DoseSlot],
    medication_id: u64,
    day: NaiveDate,
    now: NaiveDateTime,
) -> Option<SlotKey> {
    slots
        .iter()
        .filter(|s| s.medication_id == medication_id && s.day == Some(day) && !s.has_outcome())
        .filter_map(|s| {
            let scheduled = s.scheduled_at().ok()?;
            Some(((scheduled - now).abs(), s.key()?))
        })
        .min_by_key(|(distance, _)| *distance)
        .map(|(_, key)| key)
}
