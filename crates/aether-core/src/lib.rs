pub mod base;
pub mod canonical;
pub mod context;
pub mod dimension;
pub mod error;
pub mod op;

pub use base::BaseValue;
pub use context::Context;
pub use dimension::{CompoundDimension, Dimension, PathRelation};
pub use error::ParseError;
pub use op::ContextOp;
