//! Form payloads submitted by the UI.

use serde::{Deserialize, Serialize};

use fieldsync_common::{GeoPoint, Inspection, InspectionStatus, Readings, Timestamp};

/// Fields captured by the new-inspection form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewInspection {
    pub tag_id: String,
    pub tag_name: String,
    pub created_by: String,
    /// Defaults to the time of submission.
    #[serde(default)]
    pub timestamp: Option<Timestamp>,
    #[serde(default)]
    pub readings: Readings,
    #[serde(default)]
    pub notes: String,
    #[serde(default, with = "fieldsync_common::model::photo_encoding")]
    pub photos: Vec<Vec<u8>>,
    /// Defaults to `draft`.
    #[serde(default)]
    pub status: Option<InspectionStatus>,
    #[serde(default)]
    pub location: Option<GeoPoint>,
}

impl NewInspection {
    pub fn new(
        tag_id: impl Into<String>,
        tag_name: impl Into<String>,
        created_by: impl Into<String>,
    ) -> Self {
        Self {
            tag_id: tag_id.into(),
            tag_name: tag_name.into(),
            created_by: created_by.into(),
            timestamp: None,
            readings: Readings::default(),
            notes: String::new(),
            photos: Vec::new(),
            status: None,
            location: None,
        }
    }

    /// Build the record with a fresh uuid. `now` fills a missing timestamp.
    pub fn into_inspection(self, now: Timestamp) -> Inspection {
        let mut record = Inspection::new(self.tag_id, self.tag_name, self.created_by)
            .with_timestamp(self.timestamp.unwrap_or(now))
            .with_readings(self.readings)
            .with_notes(self.notes)
            .with_status(self.status.unwrap_or(InspectionStatus::Draft))
            .with_updated_at(now);
        record.photos = self.photos;
        record.location = self.location;
        record
    }
}
