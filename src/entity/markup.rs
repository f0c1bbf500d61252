use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use super::TreeObject;
use crate::context::Context;
use crate::error::EngineError;
use crate::object::{ObjectCore, OpCallback};
use crate::state::OperationState;
use crate::storage::{LocalType, StorageLocation};

const KIND: &str = "markup";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MarkupKind {
    Drawing { points: Vec<(f32, f32)>, width: f32 },
    Text { content: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarkupData {
    pub kind: MarkupKind,
}

/// A drawing or text annotation overlaid on a capture. Leaf of the entity
/// tree.
pub struct Markup {
    ctx: Context,
    core: ObjectCore,
    data: Mutex<Option<MarkupData>>,
}

impl Markup {
    pub fn create(ctx: &Context, id: impl Into<String>, data: MarkupData) -> Arc<Self> {
        Arc::new(Markup {
            ctx: ctx.clone(),
            core: ObjectCore::new(KIND, id, OperationState::Modified),
            data: Mutex::new(Some(data)),
        })
    }

    pub fn placeholder(ctx: &Context, id: impl Into<String>) -> Arc<Self> {
        Arc::new(Markup {
            ctx: ctx.clone(),
            core: ObjectCore::new(KIND, id, OperationState::NotAvailable),
            data: Mutex::new(None),
        })
    }

    pub fn data(&self) -> Option<MarkupData> {
        self.data.lock().unwrap().clone()
    }

    pub fn set_data(&self, data: MarkupData) -> Result<(), EngineError> {
        self.core.mark_modified()?;
        *self.data.lock().unwrap() = Some(data);
        Ok(())
    }
}

impl TreeObject for Markup {
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryBackend;
    use crate::Executor;

    fn ctx() -> Context {
        let executor = Executor::new(2);
        let backend = InMemoryBackend::new(&executor);
        Context::new(executor, Arc::new(backend))
    }

    #[test]
    fn drawing_payload_round_trips() {
        let data = MarkupData {
            kind: MarkupKind::Drawing {
                points: vec![(0.0, 0.0), (10.5, 4.2)],
                width: 3.0,
            },
        };
        let bytes = super::super::encode_payload(&data);
        let back: MarkupData = super::super::decode_payload(KIND, "mk1", &bytes).unwrap();
        assert_eq!(back, data);
    }

    #[test]
    fn create_starts_modified() {
        let markup = Markup::create(
            &ctx(),
            "mk1",
            MarkupData {
                kind: MarkupKind::Text {
                    content: "so good".to_string(),
                },
            },
        );
        assert_eq!(markup.core().state(), OperationState::Modified);
    }
}
