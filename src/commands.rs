use std::io;

use chrono::{Local, NaiveDate, NaiveDateTime, NaiveTime};

use crate::config::Config;
use crate::daemon::{DesktopNotifier, ReminderDaemon};
use crate::database::{Database, Medication, NewMedication, Store};
use crate::error::{Error, Result};
use crate::plan::{DoseInstruction, Frequency, Timing};
use crate::reminder::{parse_lead_kinds, LeadKind};
use crate::schedule::{
    advise_missed, affordance, classify, classify_all, nearest_open_slot, Affordance, DoseSlot,
    MissedAction, SlotKey,
};
use crate::time::{format_12h, require_time};

/// Raw `add` arguments as typed on the command line.
pub struct AddArgs {
    pub name: String,
    pub description: Option<String>,
    pub dose: u32,
    pub unit: String,
    pub times: u32,
    pub days: u32,
    pub freq: String,
    pub start: Option<String>,
    pub every: Option<u32>,
    pub at: Option<String>,
    pub slots: Option<String>,
    pub remind: Option<String>,
    pub initial_qty: Option<u32>,
    pub notes: Option<String>,
}

fn now() -> NaiveDateTime {
    Local::now().naive_local()
}

pub fn parse_day(day: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(day.trim(), "%Y-%m-%d")
        .map_err(|_| Error::Validation(format!("invalid date '{}' (expected YYYY-MM-DD)", day)))
}

fn day_or_today(day: Option<&str>) -> Result<NaiveDate> {
    match day {
        Some(d) => parse_day(d),
        None => Ok(now().date()),
    }
}

impl AddArgs {
    fn timing(&self) -> Result<Timing> {
        match (&self.slots, self.every, &self.at) {
            (Some(slots), _, _) => {
                let times = slots
                    .split(',')
                    .filter(|t| !t.trim().is_empty())
                    .map(require_time)
                    .collect::<Result<Vec<NaiveTime>>>()?;
                Ok(Timing::Explicit { times })
            }
            (None, Some(every_hours), Some(at)) => Ok(Timing::Interval {
                every_hours,
                start_time: require_time(at)?,
            }),
            _ => Err(Error::Validation(
                "give either --every with --at, or --slots".to_string(),
            )),
        }
    }

    fn into_new_medication(self) -> Result<NewMedication> {
        let instruction = DoseInstruction {
            times_per_day: self.times,
            total_days: self.days,
            frequency: self.freq.parse::<Frequency>()?,
            start_date: day_or_today(self.start.as_deref())?,
            timing: self.timing()?,
        };

        let reminders = match &self.remind {
            Some(list) => parse_lead_kinds(list)?,
            None => vec![LeadKind::ExactTime],
        };

        let required = u64::from(self.dose) * u64::from(self.times) * u64::from(self.days);
        let initial_qty = self
            .initial_qty
            .unwrap_or_else(|| u32::try_from(required).unwrap_or(u32::MAX));

        Ok(NewMedication {
            name: self.name,
            description: self.description.unwrap_or_default(),
            dose: self.dose,
            unit: self.unit,
            instruction,
            reminders,
            initial_qty,
            notes: self.notes,
        })
    }
}

pub fn add_medication(store: &Store, args: AddArgs) -> Result<()> {
    let new = args.into_new_medication()?;
    let (name, slots) = store.update(|db| {
        let med = db.add_medication(new)?;
        let (id, name) = (med.id, med.name.clone());
        Ok((name, db.slots_for(id).count()))
    })?;

    println!("Added medication: {}", name);
    println!("  Scheduled {} dose(s)", slots);
    Ok(())
}

pub fn remove_medication(store: &Store, name: &str) -> Result<()> {
    let med = store.update(|db| db.remove_medication(name))?;
    println!("Removed medication: {}", med.name);
    Ok(())
}

pub fn list_medications(store: &Store) -> Result<()> {
    let db = store.load()?;

    if db.medications.is_empty() {
        println!("No medications found.");
        return Ok(());
    }

    println!("\nMedications:");
    println!("{}", "=".repeat(60));

    for med in &db.medications {
        print_medication(&db, med);
    }
    println!();
    Ok(())
}

fn print_medication(db: &Database, med: &Medication) {
    let reminders: Vec<&str> = med.reminders.iter().map(|r| r.label()).collect();
    let taken = db.slots_for(med.id).filter(|s| s.taken).count();
    let total = db.slots_for(med.id).count();

    println!("\n{}", med.name);
    if !med.description.is_empty() {
        println!("  About:     {}", med.description);
    }
    println!("  Dose:      {} {}", med.dose, med.unit);
    println!("  Plan:      {}", med.instruction.summary());
    println!("  Stock:     {} {} (plan needs {})", med.current_qty, med.unit, med.required_qty);
    println!("  Progress:  {}/{} doses taken", taken, total);
    if reminders.is_empty() {
        println!("  Reminders: off");
    } else {
        println!("  Reminders: {}", reminders.join(", "));
    }
    if let Some(notes) = &med.notes {
        println!("  Notes:     {}", notes);
    }
}

pub fn show_schedule(store: &Store, day: Option<&str>, medication: Option<&str>) -> Result<()> {
    let db = store.load()?;
    let day = day_or_today(day)?;
    let now = now();

    let only = match medication {
        Some(name) => Some(db.require_medication(name)?.id),
        None => None,
    };

    let mut slots: Vec<DoseSlot> = db
        .slots_on(day)
        .into_iter()
        .filter(|s| only.map_or(true, |id| s.medication_id == id))
        .cloned()
        .collect();
    slots.sort_by_key(|s| s.time);

    if slots.is_empty() {
        println!("No doses scheduled for {}.", day);
        return Ok(());
    }

    println!("\nSchedule for {}:", day);
    println!("{}", "=".repeat(60));

    for (index, status) in classify_all(&slots, now) {
        let slot = &slots[index];
        let Some(med) = db.medication(slot.medication_id) else {
            continue;
        };
        let next = affordance(slot, now)?;

        let time = slot.time.map(format_12h).unwrap_or_default();
        let hint = match next {
            Affordance::MarkTaken => "take when due".to_string(),
            Affordance::ChooseMissedAction => "choose: skip or take late".to_string(),
            Affordance::ShowNote(note) => note,
            Affordance::None => match &slot.qty_taken {
                Some(qty) => format!("qty {}", qty),
                None => String::new(),
            },
        };

        println!(
            "  {}  {:<20} {:>3} {:<10} [{}] {}",
            time, med.name, med.dose, med.unit, status, hint
        );
    }
    println!();
    Ok(())
}

fn select_slot(
    db: &Database,
    name: &str,
    day: Option<&str>,
    at: Option<&str>,
    now: NaiveDateTime,
) -> Result<SlotKey> {
    let med = db.require_medication(name)?;
    let day = day_or_today(day)?;

    match at {
        Some(time) => {
            let time = require_time(time)?;
            let at_time: Vec<&DoseSlot> = db
                .slots
                .iter()
                .filter(|s| {
                    s.medication_id == med.id && s.day == Some(day) && s.time == Some(time)
                })
                .collect();
            // Doses sharing a time are used up in order
            at_time
                .iter()
                .find(|s| !s.has_outcome())
                .or(at_time.first())
                .and_then(|s| s.key())
                .ok_or(Error::SlotNotFound)
        }
        None => nearest_open_slot(&db.slots, med.id, day, now).ok_or(Error::SlotNotFound),
    }
}

pub fn take_dose(
    store: &Store,
    name: &str,
    day: Option<&str>,
    at: Option<&str>,
    qty: Option<String>,
) -> Result<()> {
    let now = now();
    let key = store.update(|db| {
        let key = select_slot(db, name, day, at, now)?;
        db.slot_mut(&key)?.record_taken(qty, now)?;
        Ok(key)
    })?;

    println!(
        "Marked '{}' dose of {} {} as taken at {}",
        name,
        key.day,
        format_12h(key.time),
        now.format("%H:%M:%S")
    );
    Ok(())
}

pub fn miss_dose(
    store: &Store,
    name: &str,
    action: MissedAction,
    day: Option<&str>,
    at: Option<&str>,
    qty: Option<String>,
) -> Result<()> {
    let now = now();
    let key = store.update(|db| {
        let key = select_slot(db, name, day, at, now)?;
        db.slot_mut(&key)?.record_missed(action, qty, now)?;
        Ok(key)
    })?;

    println!(
        "Recorded '{}' dose of {} {}: {}",
        name,
        key.day,
        format_12h(key.time),
        action.note()
    );
    Ok(())
}

pub fn advise(
    store: &Store,
    config: &Config,
    name: &str,
    day: Option<&str>,
    at: Option<&str>,
) -> Result<()> {
    let db = store.load()?;
    let now = now();
    let key = select_slot(&db, name, day, at, now)?;
    let slot = db
        .slots
        .iter()
        .find(|s| s.key() == Some(key))
        .ok_or(Error::SlotNotFound)?;

    match advise_missed(slot, now, config.missed_dose_threshold()) {
        Some(advice) => println!("Missed Dose: {}", advice.message()),
        None => println!(
            "The {} dose of {} is {}.",
            format_12h(key.time),
            name,
            classify(slot, now)?
        ),
    }
    Ok(())
}

pub fn run_daemon(store: Store, config: &Config) {
    println!("Daemon started. Checking for medication reminders...");
    println!("Press Enter (or Ctrl+C) to stop.");
    log::info!(
        "Watching {} every {:?}",
        store.path().display(),
        config.tick_interval()
    );

    let handle = ReminderDaemon::new(store, DesktopNotifier::new(config.notification_timeout_ms))
        .spawn(config.tick_interval());

    // Without a terminal there is nothing to read; run until killed.
    let mut line = String::new();
    match io::stdin().read_line(&mut line) {
        Ok(n) if n > 0 => {
            handle.stop();
            println!("Daemon stopped.");
        }
        _ => handle.wait(),
    }
}
