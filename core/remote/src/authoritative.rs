//! Last-write-wins merge over the authoritative record set.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;
use uuid::Uuid;

use fieldsync_common::{Inspection, Operation, Timestamp};

use crate::endpoint::{PushOutcome, PushRecord};

/// Authoritative inspections keyed by uuid.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "Vec<Inspection>", into = "Vec<Inspection>")]
pub struct AuthoritativeSet {
    records: HashMap<Uuid, Inspection>,
}

impl AuthoritativeSet {
    /// Create an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records held.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the set holds no records.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Authoritative copy of a record.
    pub fn get(&self, uuid: &Uuid) -> Option<&Inspection> {
        self.records.get(uuid)
    }

    /// Overwrite a record unconditionally, as another client would.
    pub fn put(&mut self, record: Inspection) {
        self.records.insert(record.uuid, Self::strip(record));
    }

    /// All records ordered by `updated_at`.
    pub fn records(&self) -> Vec<Inspection> {
        self.changed_since(None)
    }

    /// Records with `updated_at > since`, ordered by `updated_at`.
    pub fn changed_since(&self, since: Option<Timestamp>) -> Vec<Inspection> {
        let mut changed: Vec<Inspection> = self
            .records
            .values()
            .filter(|r| since.map_or(true, |s| r.updated_at > s))
            .cloned()
            .collect();
        changed.sort_by(|a, b| a.updated_at.cmp(&b.updated_at).then(a.uuid.cmp(&b.uuid)));
        changed
    }

    /// Apply a pushed batch item by item.
    pub fn apply(&mut self, batch: Vec<PushRecord>) -> PushOutcome {
        let mut outcome = PushOutcome::default();

        for PushRecord { operation, record } in batch {
            let uuid = record.uuid;
            let current = self.records.get(&uuid);

            if let Some(current) = current.filter(|c| c.updated_at > record.updated_at) {
                debug!("Push of {} {} superseded by newer remote copy", operation, uuid);
                outcome.superseded.push(current.clone());
                continue;
            }

            match operation {
                Operation::Create | Operation::Update => {
                    let unchanged = current.is_some_and(|c| c.updated_at == record.updated_at);
                    if !unchanged {
                        self.records.insert(uuid, Self::strip(record));
                        outcome.synced_count += 1;
                    }
                }
                Operation::Delete => {
                    if self.records.remove(&uuid).is_some() {
                        outcome.synced_count += 1;
                    }
                }
            }
            outcome.confirmed.push(uuid);
        }

        outcome
    }

    fn strip(mut record: Inspection) -> Inspection {
        record.local_id = None;
        record
    }
}

impl From<Vec<Inspection>> for AuthoritativeSet {
    fn from(records: Vec<Inspection>) -> Self {
        let mut set = Self::new();
        for record in records {
            set.put(record);
        }
        set
    }
}

impl From<AuthoritativeSet> for Vec<Inspection> {
    fn from(set: AuthoritativeSet) -> Self {
        set.records()
    }
}
