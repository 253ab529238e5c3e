pub mod error;
pub mod frame;
pub mod primitive;
pub mod token;
pub mod value;

pub use error::WireError;
pub use frame::{frame, Handshake, HANDSHAKE_LEN, MAGIC};
pub use primitive::{Mode, Reader, Writer};
pub use token::{ClientBody, ClientToken, ServerToken};
pub use value::Wire;
