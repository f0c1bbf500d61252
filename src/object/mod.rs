mod core;
mod persist;
mod round;

pub use self::core::ObjectCore;
pub use round::{ChildRound, ErrorPolicy, OpCallback};

pub(crate) use self::core::{RetrieveDisposition, SavePlan};
pub(crate) use persist::{
    delete_payload, retrieve_payload, retrieve_payload_claimed, save_payload, FetchDone,
};
