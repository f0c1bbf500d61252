use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use super::TreeObject;
use crate::context::Context;
use crate::object::{ObjectCore, OpCallback};
use crate::state::OperationState;
use crate::storage::{LocalType, StorageLocation};

const KIND: &str = "category";

/// Venue classification sourced from the places provider. Categories form
/// a tree through `parent_id`, but persistence-wise each node is an
/// independent shared leaf.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryData {
    pub name: String,
    pub parent_id: Option<String>,
}

pub struct Category {
    ctx: Context,
    core: ObjectCore,
    data: Mutex<Option<CategoryData>>,
}

impl Category {
    pub fn create(ctx: &Context, id: impl Into<String>, data: CategoryData) -> Arc<Self> {
        Arc::new(Category {
            ctx: ctx.clone(),
            core: ObjectCore::new(KIND, id, OperationState::Modified),
            data: Mutex::new(Some(data)),
        })
    }

    pub fn placeholder(ctx: &Context, id: impl Into<String>) -> Arc<Self> {
        Arc::new(Category {
            ctx: ctx.clone(),
            core: ObjectCore::new(KIND, id, OperationState::NotAvailable),
            data: Mutex::new(None),
        })
    }

    pub fn data(&self) -> Option<CategoryData> {
        self.data.lock().unwrap().clone()
    }
}

impl TreeObject for Category {
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
