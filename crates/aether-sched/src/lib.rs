pub mod accumulate;
pub mod error;
pub mod scheduler;
pub mod token;

pub use accumulate::{merge, Merge};
pub use error::SchedError;
pub use scheduler::{
    spawn, BatchSink, NullSink, SchedConfig, SchedulerHandle, SyncOp,
};
pub use token::{AsyncToken, TokenFlags, TokenPayload};
