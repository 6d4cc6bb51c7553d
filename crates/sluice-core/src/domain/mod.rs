//! Domain model (ids, operation types, errors).

pub mod errors;
pub mod ids;
pub mod op;

pub use errors::OpError;
pub use ids::RequestId;
pub use op::{OpFn, OpFuture, OpType, Priority};
