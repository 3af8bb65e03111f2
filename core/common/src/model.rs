//! Inspection domain model and outbox entries.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::clock::{Clock, SystemClock};
use crate::types::{LocalId, Timestamp};
use crate::{Error, Result};

/// Maximum length of inspection notes, in characters.
pub const MAX_NOTES_LEN: usize = 500;

/// Maximum number of photos attached to one inspection.
pub const MAX_PHOTOS: usize = 5;

/// Lifecycle status of an inspection.
///
/// Only `Synced` means the remote holds the current version and no outbox
/// entry is owed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InspectionStatus {
    /// Saved but not yet finished by the inspector.
    Draft,
    /// Finished locally, awaiting sync.
    Complete,
    /// Confirmed by the remote endpoint.
    Synced,
}

impl InspectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InspectionStatus::Draft => "draft",
            InspectionStatus::Complete => "complete",
            InspectionStatus::Synced => "synced",
        }
    }
}

impl fmt::Display for InspectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InspectionStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "draft" => Ok(InspectionStatus::Draft),
            "complete" => Ok(InspectionStatus::Complete),
            "synced" => Ok(InspectionStatus::Synced),
            other => Err(Error::InvalidInput(format!("Unknown status: {}", other))),
        }
    }
}

/// Measurement channels captured during an inspection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Readings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pressure: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flow_rate: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vibration: Option<f64>,
}

impl Readings {
    fn channels(&self) -> [(&'static str, Option<f64>); 4] {
        [
            ("temperature", self.temperature),
            ("pressure", self.pressure),
            ("flowRate", self.flow_rate),
            ("vibration", self.vibration),
        ]
    }
}

/// Capture position.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

/// A field inspection of one piece of equipment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Inspection {
    /// Store handle; local only, never sent to the remote.
    #[serde(skip)]
    pub local_id: Option<LocalId>,
    /// Reconciliation key.
    pub uuid: Uuid,
    pub tag_id: String,
    pub tag_name: String,
    /// When the inspection was performed.
    pub timestamp: Timestamp,
    #[serde(default)]
    pub readings: Readings,
    #[serde(default)]
    pub notes: String,
    /// Encoded image payloads, base64 on the wire.
    #[serde(default, with = "photo_encoding")]
    pub photos: Vec<Vec<u8>>,
    pub status: InspectionStatus,
    pub created_by: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<GeoPoint>,
    /// Conflict-resolution clock.
    pub updated_at: Timestamp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub synced_at: Option<Timestamp>,
}

impl Inspection {
    /// Create a new draft inspection with a fresh uuid.
    pub fn new(
        tag_id: impl Into<String>,
        tag_name: impl Into<String>,
        created_by: impl Into<String>,
    ) -> Self {
        let now = SystemClock.now();
        Self {
            local_id: None,
            uuid: Uuid::new_v4(),
            tag_id: tag_id.into(),
            tag_name: tag_name.into(),
            timestamp: now,
            readings: Readings::default(),
            notes: String::new(),
            photos: Vec::new(),
            status: InspectionStatus::Draft,
            created_by: created_by.into(),
            location: None,
            updated_at: now,
            synced_at: None,
        }
    }

    pub fn with_readings(mut self, readings: Readings) -> Self {
        self.readings = readings;
        self
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = notes.into();
        self
    }

    pub fn with_photo(mut self, photo: Vec<u8>) -> Self {
        self.photos.push(photo);
        self
    }

    pub fn with_status(mut self, status: InspectionStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_location(mut self, location: GeoPoint) -> Self {
        self.location = Some(location);
        self
    }

    pub fn with_timestamp(mut self, timestamp: Timestamp) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_uuid(mut self, uuid: Uuid) -> Self {
        self.uuid = uuid;
        self
    }

    pub fn with_updated_at(mut self, updated_at: Timestamp) -> Self {
        self.updated_at = updated_at;
        self
    }

    /// Whether the local copy still owes the remote a change.
    pub fn is_pending(&self) -> bool {
        self.status != InspectionStatus::Synced
    }

    /// Check field constraints.
    ///
    /// # Errors
    /// - Blank tag id or tag name
    /// - Notes longer than [`MAX_NOTES_LEN`] characters
    /// - More than [`MAX_PHOTOS`] photos
    /// - Non-finite reading
    pub fn validate(&self) -> Result<()> {
        if self.tag_id.trim().is_empty() {
            return Err(Error::InvalidInput("Tag is required".to_string()));
        }
        if self.tag_name.trim().is_empty() {
            return Err(Error::InvalidInput("Tag name is required".to_string()));
        }
        let notes_len = self.notes.chars().count();
        if notes_len > MAX_NOTES_LEN {
            return Err(Error::InvalidInput(format!(
                "Notes too long: {} characters (max {})",
                notes_len, MAX_NOTES_LEN
            )));
        }
        if self.photos.len() > MAX_PHOTOS {
            return Err(Error::InvalidInput(format!(
                "Too many photos: {} (max {})",
                self.photos.len(),
                MAX_PHOTOS
            )));
        }
        for (name, value) in self.readings.channels() {
            if let Some(v) = value {
                if !v.is_finite() {
                    return Err(Error::InvalidInput(format!(
                        "Reading {} must be a finite number",
                        name
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Partial update applied by the record store.
///
/// `None` leaves a field unchanged.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InspectionPatch {
    pub tag_id: Option<String>,
    pub tag_name: Option<String>,
    pub timestamp: Option<Timestamp>,
    pub readings: Option<Readings>,
    pub notes: Option<String>,
    pub photos: Option<Vec<Vec<u8>>>,
    pub status: Option<InspectionStatus>,
    /// `Some(None)` clears the location.
    pub location: Option<Option<GeoPoint>>,
}

impl InspectionPatch {
    /// Whether the patch changes nothing.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Apply the patch in place. Does not touch `updated_at`.
    pub fn apply(&self, target: &mut Inspection) {
        if let Some(tag_id) = &self.tag_id {
            target.tag_id = tag_id.clone();
        }
        if let Some(tag_name) = &self.tag_name {
            target.tag_name = tag_name.clone();
        }
        if let Some(timestamp) = self.timestamp {
            target.timestamp = timestamp;
        }
        if let Some(readings) = self.readings {
            target.readings = readings;
        }
        if let Some(notes) = &self.notes {
            target.notes = notes.clone();
        }
        if let Some(photos) = &self.photos {
            target.photos = photos.clone();
        }
        if let Some(status) = self.status {
            target.status = status;
        }
        if let Some(location) = self.location {
            target.location = location;
        }
    }
}

/// Kind of entity an outbox entry refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Inspection,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Inspection => "inspection",
        }
    }
}

impl FromStr for EntityKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "inspection" => Ok(EntityKind::Inspection),
            other => Err(Error::InvalidInput(format!("Unknown entity kind: {}", other))),
        }
    }
}

/// Mutation recorded in the outbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Create,
    Update,
    Delete,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Create => "create",
            Operation::Update => "update",
            Operation::Delete => "delete",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operation {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "create" => Ok(Operation::Create),
            "update" => Ok(Operation::Update),
            "delete" => Ok(Operation::Delete),
            other => Err(Error::InvalidInput(format!("Unknown operation: {}", other))),
        }
    }
}

/// A pending mutation awaiting transmission to the remote.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboxEntry {
    /// Store sequence number. A coalesced replacement always gets a new one.
    pub id: i64,
    pub entity_id: Uuid,
    pub entity: EntityKind,
    pub operation: Operation,
    /// Enqueue time; replay order.
    pub created_at: Timestamp,
    /// Snapshot taken at enqueue time. Always present for deletes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Inspection>,
}

/// Serde adapter encoding photo payloads as base64 strings.
pub mod photo_encoding {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde::ser::SerializeSeq;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(photos: &[Vec<u8>], serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(photos.len()))?;
        for photo in photos {
            seq.serialize_element(&STANDARD.encode(photo))?;
        }
        seq.end()
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<Vec<u8>>, D::Error> {
        let encoded = Vec::<String>::deserialize(deserializer)?;
        encoded
            .iter()
            .map(|e| STANDARD.decode(e).map_err(serde::de::Error::custom))
            .collect()
    }
}
