use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::schedule::{DoseSlot, SlotKey};
use crate::time::{format_12h, format_24h};

/// How long before the scheduled time a reminder goes out.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LeadKind {
    TenMinutesBefore,
    FiveMinutesBefore,
    ExactTime,
}

impl LeadKind {
    pub fn label(self) -> &'static str {
        match self {
            LeadKind::TenMinutesBefore => "10 minutes before",
            LeadKind::FiveMinutesBefore => "5 minutes before",
            LeadKind::ExactTime => "Exact time",
        }
    }

    /// Half-open window `(lead - 1, lead]` in minutes until the dose.
    ///
    /// Ticks land anywhere inside a minute, so an exact comparison would miss.
    pub fn window_hit(self, delta_minutes: f64) -> bool {
        let upper = match self {
            LeadKind::TenMinutesBefore => 10.0,
            LeadKind::FiveMinutesBefore => 5.0,
            LeadKind::ExactTime => 0.0,
        };
        delta_minutes > upper - 1.0 && delta_minutes <= upper
    }
}

impl fmt::Display for LeadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for LeadKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "10m" | "10" | "10 minutes before" => Ok(LeadKind::TenMinutesBefore),
            "5m" | "5" | "5 minutes before" => Ok(LeadKind::FiveMinutesBefore),
            "0m" | "0" | "exact" | "exact time" => Ok(LeadKind::ExactTime),
            other => Err(Error::Validation(format!(
                "unknown reminder option '{}' (expected 10m, 5m or exact)",
                other
            ))),
        }
    }
}

/// Parses a comma separated list such as "10m, exact" or
/// "10 minutes before, Exact time". Duplicates collapse.
pub fn parse_lead_kinds(list: &str) -> Result<Vec<LeadKind>> {
    let mut kinds = Vec::new();
    for part in list.split(',').filter(|p| !p.trim().is_empty()) {
        let kind = part.parse::<LeadKind>()?;
        if !kinds.contains(&kind) {
            kinds.push(kind);
        }
    }
    Ok(kinds)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FiredKey {
    pub slot: SlotKey,
    pub lead: LeadKind,
}

/// Reminders already sent during this process lifetime.
///
/// Never persisted: a restart may repeat a reminder whose window is still open.
#[derive(Debug, Default)]
pub struct FiredSet {
    keys: HashSet<FiredKey>,
}

impl FiredSet {
    pub fn contains(&self, key: &FiredKey) -> bool {
        self.keys.contains(key)
    }

    /// Returns false if the key was already present.
    pub fn insert(&mut self, key: FiredKey) -> bool {
        self.keys.insert(key)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn reset(&mut self) {
        self.keys.clear();
    }
}

/// Per-medication details the evaluator needs to word a reminder.
#[derive(Debug, Clone)]
pub struct ReminderTarget<'a> {
    pub medication_id: u64,
    pub name: &'a str,
    pub dose: u32,
    pub unit: &'a str,
    pub leads: &'a [LeadKind],
}

/// A reminder ready for dispatch.
#[derive(Debug, Clone, PartialEq)]
pub struct Notice {
    pub key: FiredKey,
    pub title: String,
    pub body: String,
    pub data: HashMap<String, String>,
}

#[derive(Debug, Default)]
pub struct ReminderEvaluator {
    fired: FiredSet,
}

impl ReminderEvaluator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fired(&self) -> &FiredSet {
        &self.fired
    }

    pub fn reset(&mut self) {
        self.fired.reset();
    }

    /// Evaluates one tick against a snapshot of slots.
    ///
    /// Every returned notice has been recorded as fired and will not be
    /// produced again. Malformed slots and slots of unknown medications are
    /// skipped for this tick only.
    pub fn tick(
        &mut self,
        now: NaiveDateTime,
        targets: &[ReminderTarget<'_>],
        slots: &[DoseSlot],
    ) -> Vec<Notice> {
        let by_id: HashMap<u64, &ReminderTarget<'_>> =
            targets.iter().map(|t| (t.medication_id, t)).collect();

        let mut notices = Vec::new();
        for slot in slots.iter().filter(|s| !s.has_outcome()) {
            let Some(target) = by_id.get(&slot.medication_id) else {
                log::debug!("No medication {} for slot, skipping", slot.medication_id);
                continue;
            };
            if target.leads.is_empty() {
                continue;
            }

            let (Some(key), Ok(scheduled)) = (slot.key(), slot.scheduled_at()) else {
                log::warn!(
                    "Skipping malformed slot for medication {}",
                    slot.medication_id
                );
                continue;
            };

            let delta_minutes = (scheduled - now).num_milliseconds() as f64 / 60_000.0;

            for lead in target.leads {
                if !lead.window_hit(delta_minutes) {
                    continue;
                }
                let fired_key = FiredKey { slot: key, lead: *lead };
                if self.fired.contains(&fired_key) {
                    continue;
                }
                self.fired.insert(fired_key);
                notices.push(build_notice(fired_key, target));
            }
        }

        notices
    }
}

fn build_notice(key: FiredKey, target: &ReminderTarget<'_>) -> Notice {
    let title = match key.lead {
        LeadKind::ExactTime => format!("Time to take {}", target.name),
        _ => format!("{} reminder ({})", target.name, key.lead),
    };
    let body = format!(
        "{} {} of {} scheduled at {}",
        target.dose,
        target.unit,
        target.name,
        format_12h(key.slot.time)
    );

    let mut data = HashMap::new();
    data.insert("medication_id".to_string(), key.slot.medication_id.to_string());
    data.insert("day".to_string(), key.slot.day.to_string());
    data.insert("time".to_string(), format_24h(key.slot.time));
    data.insert("dose".to_string(), key.slot.dose.to_string());
    data.insert("lead".to_string(), key.lead.label().to_string());

    Notice {
        key,
        title,
        body,
        data,
    }
}
