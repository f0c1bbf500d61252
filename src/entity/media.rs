use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use super::TreeObject;
use crate::context::Context;
use crate::error::EngineError;
use crate::object::{ObjectCore, OpCallback};
use crate::state::OperationState;
use crate::storage::{LocalType, StorageLocation};

const KIND: &str = "media";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MediaKind {
    Photo,
    Video,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaData {
    pub kind: MediaKind,
    #[serde(with = "blob_serde")]
    pub bytes: Vec<u8>,
}

mod blob_serde {
    use base64::{engine::general_purpose::STANDARD, Engine};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(bytes: &Vec<u8>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        STANDARD.encode(bytes).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s: String = String::deserialize(deserializer)?;
        STANDARD.decode(&s).map_err(serde::de::Error::custom)
    }
}

/// A single photo or video capture. Leaf of the entity tree.
pub struct Media {
    ctx: Context,
    core: ObjectCore,
    data: Mutex<Option<MediaData>>,
}

impl Media {
    /// A fresh capture with unsaved bytes.
    pub fn create(ctx: &Context, id: impl Into<String>, data: MediaData) -> Arc<Self> {
        Arc::new(Media {
            ctx: ctx.clone(),
            core: ObjectCore::new(KIND, id, OperationState::Modified),
            data: Mutex::new(Some(data)),
        })
    }

    /// A reference materialized from a parent's payload; bytes arrive on
    /// retrieval.
    pub fn placeholder(ctx: &Context, id: impl Into<String>) -> Arc<Self> {
        Arc::new(Media {
            ctx: ctx.clone(),
            core: ObjectCore::new(KIND, id, OperationState::NotAvailable),
            data: Mutex::new(None),
        })
    }

    pub fn data(&self) -> Option<MediaData> {
        self.data.lock().unwrap().clone()
    }

    pub fn set_data(&self, data: MediaData) -> Result<(), EngineError> {
        self.core.mark_modified()?;
        *self.data.lock().unwrap() = Some(data);
        Ok(())
    }
}

impl TreeObject for Media {
    fn retrieve_recursive(
        self: Arc<Self>,
        location: StorageLocation,
        local_type: LocalType,
        force: bool,
        done: OpCallback,
    ) {
        let ctx = self.ctx.clone();
        let target = Arc::clone(&self);
        super::retrieve_leaf(&ctx, self, location, local_type, force, done, move |data| {
            *target.data.lock().unwrap() = Some(data);
        });
    }

    fn save_recursive(
        self: Arc<Self>,
        location: StorageLocation,
        local_type: LocalType,
        done: OpCallback,
    ) {
        let ctx = self.ctx.clone();
        let data = self.data.lock().unwrap().clone();
        super::save_leaf(&ctx, self, data, location, local_type, done);
    }

    fn delete_recursive(
        self: Arc<Self>,
        location: StorageLocation,
        local_type: LocalType,
        done: OpCallback,
    ) {
        let ctx = self.ctx.clone();
        super::delete_leaf(&ctx, self, location, local_type, done);
    }

    fn object_id(&self) -> String {
        self.core.id().to_string()
    }

    fn object_kind(&self) -> &'static str {
        KIND
    }

    fn core(&self) -> &ObjectCore {
        &self.core
    }
}
