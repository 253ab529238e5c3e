pub mod client;
pub mod error;
pub mod remote;
pub mod server;

pub use client::{AepClient, Outcome};
pub use error::AepError;
pub use remote::{RemoteParticipant, SinkRouter};
pub use server::{AepServer, ServerConfig};
