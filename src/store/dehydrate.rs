//! Dehydration - move a warm store across process boundaries.
//!
//! Each value is encoded with bitcode; the envelope is JSON with payloads
//! in base64, so a snapshot can be embedded in a page or a config blob and
//! restored into any `Store` backend.

use std::time::SystemTime;

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::debug;

use super::Store;
use crate::error::CacheError;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DehydratedEntry {
    pub id: String,
    #[serde(with = "payload_serde")]
    pub payload: Vec<u8>,
}

mod payload_serde {
    use base64::{engine::general_purpose::STANDARD, Engine};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(payload: &Vec<u8>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        STANDARD.encode(payload).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s: String = String::deserialize(deserializer)?;
        STANDARD.decode(&s).map_err(serde::de::Error::custom)
    }
}

/// Point-in-time copy of one entity's store, ordered by id.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DehydratedStore {
    pub entity: String,
    pub entries: Vec<DehydratedEntry>,
    pub taken_at: SystemTime,
}

impl DehydratedStore {
    /// Copy every value currently in `store`.
    pub fn capture<D, S>(store: &S) -> Result<Self, CacheError>
    where
        D: Serialize,
        S: Store<D> + ?Sized,
    {
        let mut entries = Vec::new();
        for id in store.ids() {
            if let Some(value) = store.get(&id) {
                let payload = bitcode::serialize(&value)?;
                entries.push(DehydratedEntry { id, payload });
            }
        }
        entries.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(DehydratedStore {
            entity: store.name().to_string(),
            entries,
            taken_at: SystemTime::now(),
        })
    }

    /// Write every entry into `store` through `set`, so its observers are
    /// notified. Nothing is written unless every payload decodes.
    pub fn restore<D, S>(&self, store: &S) -> Result<usize, CacheError>
    where
        D: DeserializeOwned,
        S: Store<D> + ?Sized,
    {
        if self.entity != store.name() {
            return Err(CacheError::Serde(format!(
                "snapshot of {} cannot hydrate {}",
                self.entity,
                store.name()
            )));
        }

        let decoded = self
            .entries
            .iter()
            .map(|entry| Ok((entry.id.as_str(), bitcode::deserialize::<D>(&entry.payload)?)))
            .collect::<Result<Vec<_>, CacheError>>()?;

        let restored = decoded.len();
        for (id, value) in decoded {
            store.set(id, value);
        }
        debug!(entity = %self.entity, restored, "store hydrated");
        Ok(restored)
    }

    pub fn to_json(&self) -> Result<String, CacheError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self, CacheError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
