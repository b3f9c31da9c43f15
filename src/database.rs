use std::fs;
use std::path::{Path, PathBuf};

#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::plan::{expand, DoseInstruction};
use crate::reminder::{LeadKind, ReminderTarget};
use crate::schedule::{DoseSlot, SlotKey};

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Medication {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Quantity per administration, in `unit`.
    pub dose: u32,
    pub unit: String,
    pub instruction: DoseInstruction,
    #[serde(default)]
    pub reminders: Vec<LeadKind>,
    pub initial_qty: u32,
    pub current_qty: u32,
    /// Total quantity the whole plan needs.
    pub required_qty: u64,
    pub notes: Option<String>,
}

impl Medication {
    pub fn reminder_target(&self) -> ReminderTarget<'_> {
        ReminderTarget {
            medication_id: self.id,
            name: &self.name,
            dose: self.dose,
            unit: &self.unit,
            leads: &self.reminders,
        }
    }
}

/// Everything needed to register a medication and its dosing plan.
#[derive(Debug, Clone)]
pub struct NewMedication {
    pub name: String,
    pub description: String,
    pub dose: u32,
    pub unit: String,
    pub instruction: DoseInstruction,
    pub reminders: Vec<LeadKind>,
    pub initial_qty: u32,
    pub notes: Option<String>,
}

impl NewMedication {
    fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::Validation("medication name cannot be empty".to_string()));
        }
        if self.dose == 0 {
            return Err(Error::Validation("dose must be greater than 0".to_string()));
        }
        if self.initial_qty == 0 {
            return Err(Error::Validation(
                "initial quantity must be greater than 0".to_string(),
            ));
        }
        self.instruction.validate()
    }

    pub fn required_qty(&self) -> u64 {
        u64::from(self.dose)
            * u64::from(self.instruction.times_per_day)
            * u64::from(self.instruction.total_days)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct Database {
    #[serde(default)]
    pub next_id: u64,
    #[serde(default)]
    pub medications: Vec<Medication>,
    #[serde(default)]
    pub slots: Vec<DoseSlot>,
}

impl Database {
    /// Registers a medication and stores its expanded dose slots.
    ///
    /// Names are unique case-insensitively. Nothing is stored if the plan
    /// does not validate.
    pub fn add_medication(&mut self, new: NewMedication) -> Result<&Medication> {
        new.validate()?;

        if self.find_medication(&new.name).is_some() {
            return Err(Error::DuplicateMedication(new.name));
        }

        let id = self.next_id + 1;
        let slots = expand(id, &new.instruction)?;
        let required_qty = new.required_qty();

        self.next_id = id;
        self.slots.extend(slots);
        self.medications.push(Medication {
            id,
            name: new.name,
            description: new.description,
            dose: new.dose,
            unit: new.unit,
            instruction: new.instruction,
            reminders: new.reminders,
            initial_qty: new.initial_qty,
            current_qty: new.initial_qty,
            required_qty,
            notes: new.notes,
        });

        Ok(&self.medications[self.medications.len() - 1])
    }

    /// Deletes a medication together with all of its slots.
    pub fn remove_medication(&mut self, name: &str) -> Result<Medication> {
        let index = self
            .medications
            .iter()
            .position(|m| m.name.eq_ignore_ascii_case(name.trim()))
            .ok_or_else(|| Error::MedicationNotFound(name.to_string()))?;

        let med = self.medications.remove(index);
        self.slots.retain(|s| s.medication_id != med.id);
        Ok(med)
    }

    pub fn find_medication(&self, name: &str) -> Option<&Medication> {
        self.medications
            .iter()
            .find(|m| m.name.eq_ignore_ascii_case(name.trim()))
    }

    pub fn require_medication(&self, name: &str) -> Result<&Medication> {
        self.find_medication(name)
            .ok_or_else(|| Error::MedicationNotFound(name.to_string()))
    }

    pub fn medication(&self, id: u64) -> Option<&Medication> {
        self.medications.iter().find(|m| m.id == id)
    }

    pub fn slots_for(&self, medication_id: u64) -> impl Iterator<Item = &DoseSlot> {
        self.slots
            .iter()
            .filter(move |s| s.medication_id == medication_id)
    }

    pub fn slots_on(&self, day: NaiveDate) -> Vec<&DoseSlot> {
        crate::schedule::slots_on(&self.slots, day)
    }

    pub fn slot_mut(&mut self, key: &SlotKey) -> Result<&mut DoseSlot> {
        self.slots
            .iter_mut()
            .find(|s| s.key().as_ref() == Some(key))
            .ok_or(Error::SlotNotFound)
    }

    pub fn reminder_targets(&self) -> Vec<ReminderTarget<'_>> {
        self.medications.iter().map(Medication::reminder_target).collect()
    }
}

/// JSON file holding the medication database.
#[derive(Debug, Clone)]
pub struct Store {
    path: PathBuf,
}

impl Store {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Store { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads the database from disk.
    ///
    /// A missing file yields an empty database. A file that cannot be parsed
    /// is moved aside to `*.json.corrupted` and an empty database is
    /// returned, so later loads start clean instead of re-reporting it.
    pub fn load(&self) -> Result<Database> {
        if !self.path.exists() {
            return Ok(Database::default());
        }

        let contents = fs::read_to_string(&self.path)?;

        match serde_json::from_str::<Database>(&contents) {
            Ok(db) => Ok(db),
            Err(e) => {
                let backup_path = self.path.with_extension("json.corrupted");
                log::error!(
                    "Database {} is corrupted ({}), moving it to {}",
                    self.path.display(),
                    e,
                    backup_path.display()
                );
                fs::rename(&self.path, &backup_path)?;
                Ok(Database::default())
            }
        }
    }

    /// Saves atomically: write a temp file, then rename over the original.
    /// Permissions are set to 0600 on Unix.
    pub fn save(&self, db: &Database) -> Result<()> {
        let json = serde_json::to_string_pretty(db)?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let temp_path = self.path.with_extension("json.tmp");
        fs::write(&temp_path, &json)?;

        if let Err(e) = fs::rename(&temp_path, &self.path) {
            let _ = fs::remove_file(&temp_path);
            return Err(e.into());
        }

        #[cfg(unix)]
        {
            let mut perms = fs::metadata(&self.path)?.permissions();
            perms.set_mode(0o600);
            if let Err(e) = fs::set_permissions(&self.path, perms) {
                log::warn!("Failed to set permissions on {}: {}", self.path.display(), e);
            }
        }

        Ok(())
    }

    /// Load, apply `f`, and save only if `f` succeeds.
    pub fn update<T>(&self, f: impl FnOnce(&mut Database) -> Result<T>) -> Result<T> {
        let mut db = self.load()?;
        let value = f(&mut db)?;
        self.save(&db)?;
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::{Frequency, Timing};
    use chrono::NaiveTime;
    use tempfile::TempDir;

    fn amoxicillin() -> NewMedication {
        NewMedication {
            name: "Amoxicillin".to_string(),
            description: "Antibiotic".to_string(),
            dose: 2,
            unit: "tablets".to_string(),
            instruction: DoseInstruction {
                times_per_day: 3,
                total_days: 7,
                frequency: Frequency::Daily,
                start_date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
                timing: Timing::Interval {
                    every_hours: 6,
                    start_time: NaiveTime::from_hms_opt(8, 0, 0).unwrap(),
                },
            },
            reminders: vec![LeadKind::ExactTime],
            initial_qty: 42,
            notes: None,
        }
    }

    #[test]
    fn test_add_medication_expands_slots() {
        let mut db = Database::default();
        let med = db.add_medication(amoxicillin()).unwrap();
        assert_eq!(med.id, 1);
        assert_eq!(med.required_qty, 42);
        assert_eq!(med.current_qty, 42);

        assert_eq!(db.slots.len(), 21);
        assert_eq!(db.slots_for(1).count(), 21);
        assert_eq!(
            db.slots_on(NaiveDate::from_ymd_opt(2024, 1, 7).unwrap()).len(),
            3
        );
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let mut db = Database::default();
        db.add_medication(amoxicillin()).unwrap();

        let mut again = amoxicillin();
        again.name = "AMOXICILLIN".to_string();
        assert!(matches!(
            db.add_medication(again),
            Err(Error::DuplicateMedication(_))
        ));
        assert_eq!(db.slots.len(), 21);
    }

    #[test]
    fn test_invalid_medication_stores_nothing() {
        let mut db = Database::default();

        let mut bad = amoxicillin();
        bad.instruction.total_days = 0;
        assert!(matches!(db.add_medication(bad), Err(Error::Validation(_))));

        let mut bad = amoxicillin();
        bad.dose = 0;
        assert!(matches!(db.add_medication(bad), Err(Error::Validation(_))));

        let mut bad = amoxicillin();
        bad.initial_qty = 0;
        assert!(matches!(db.add_medication(bad), Err(Error::Validation(_))));

        assert!(db.medications.is_empty());
        assert!(db.slots.is_empty());
        assert_eq!(db.next_id, 0);
    }

    #[test]
    fn test_remove_medication_drops_slots() {
        let mut db = Database::default();
        db.add_medication(amoxicillin()).unwrap();

        let mut other = amoxicillin();
        other.name = "Ibuprofen".to_string();
        db.add_medication(other).unwrap();

        let removed = db.remove_medication("amoxicillin").unwrap();
        assert_eq!(removed.id, 1);
        assert!(db.slots.iter().all(|s| s.medication_id == 2));
        assert!(matches!(
            db.remove_medication("amoxicillin"),
            Err(Error::MedicationNotFound(_))
        ));
    }

    #[test]
    fn test_store_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = Store::new(dir.path().join("data").join("medibuddy.json"));

        assert!(store.load().unwrap().medications.is_empty());

        store
            .update(|db| db.add_medication(amoxicillin()).map(|m| m.id))
            .unwrap();

        let db = store.load().unwrap();
        assert_eq!(db.medications.len(), 1);
        assert_eq!(db.slots.len(), 21);
        assert_eq!(db.medications[0].instruction, amoxicillin().instruction);
        assert!(!store.path().with_extension("json.tmp").exists());

        #[cfg(unix)]
        {
            let mode = fs::metadata(store.path()).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }

    #[test]
    fn test_failed_update_is_not_saved() {
        let dir = TempDir::new().unwrap();
        let store = Store::new(dir.path().join("medibuddy.json"));

        let result = store.update(|db| db.remove_medication("nothing").map(|_| ()));
        assert!(result.is_err());
        assert!(!store.path().exists());
    }

    #[test]
    fn test_corrupted_file_is_backed_up() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("medibuddy.json");
        fs::write(&path, "{ not json").unwrap();

        let store = Store::new(&path);
        let db = store.load().unwrap();
        assert!(db.medications.is_empty());

        let backup = path.with_extension("json.corrupted");
        assert_eq!(fs::read_to_string(&backup).unwrap(), "{ not json");
        assert!(!path.exists());

        // A second load finds no file and leaves the backup alone
        fs::write(&backup, "{ first copy").unwrap();
        assert!(store.load().unwrap().medications.is_empty());
        assert_eq!(fs::read_to_string(&backup).unwrap(), "{ first copy");
    }

    #[test]
    fn test_slots_missing_schedule_still_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("medibuddy.json");
        fs::write(
            &path,
            r#"{"next_id": 1, "medications": [], "slots": [{"medication_id": 1, "day": "2024-01-01"}]}"#,
        )
        .unwrap();

        let db = Store::new(&path).load().unwrap();
        assert_eq!(db.slots.len(), 1);
        assert_eq!(db.slots[0].time, None);
        assert!(db.slots[0].key().is_none());
    }
}
