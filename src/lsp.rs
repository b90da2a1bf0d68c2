pub mod codec;
pub mod error;
pub mod messages;
pub mod session;
pub mod transport;
pub mod types;

pub use error::ProbeError;
