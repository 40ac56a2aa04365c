//! Bridge between a Tion breezer on Bluetooth LE and an MQTT broker.
//!
//! The breezer speaks a fixed 20-byte frame protocol and accepts a single
//! connection. [`Session`] owns that connection and runs every exchange
//! through the timeout-bounded [`CallExecutor`]; [`CommandHandler`] turns
//! partial updates into the minimal write.

pub mod error;
pub mod executor;
pub mod handler;
pub mod message;
pub mod mqtt;
pub mod protocol;
pub mod session;
pub mod transport;
pub mod transport_btleplug;

pub use error::{Error, Result};
pub use executor::{CallExecutor, Outcome};
pub use handler::{CommandHandler, ConnectionPolicy, StateNotifier};
pub use message::{PartialUpdate, StateReport};
pub use protocol::{Gate, Status};
pub use session::{LinkState, Session};
pub use transport::{TionTransport, TionTransportManager};
