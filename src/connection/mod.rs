//! Connection management
//!
//! The single-peer state machine and the notifications it emits.

mod manager;
mod state;

pub use manager::{ConnectionManager, ManagerConfig};
pub use state::{ConnectionState, Event, EventReceiver, EventSender, Generation};
