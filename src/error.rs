use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid input: {0}")]
    Validation(String),

    /// A stored slot is missing its scheduled day or time.
    #[error("Dose slot for medication {medication_id} has no scheduled day or time")]
    MalformedSlot { medication_id: u64 },

    #[error("Invalid time format '{0}'")]
    InvalidTime(String),

    #[error("Medication '{0}' not found")]
    MedicationNotFound(String),

    #[error("Medication '{0}' already exists")]
    DuplicateMedication(String),

    #[error("No matching dose slot found")]
    SlotNotFound,

    #[error("An outcome has already been recorded for this dose")]
    OutcomeAlreadyRecorded,

    #[error("This dose is not missed yet; mark it taken instead")]
    NotMissed,

    #[error("Notification dispatch failed: {0}")]
    Notify(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
