//! Core terminal bridge components.
//!
//! - **codec**: classifies inbound messages as resize or input
//! - **device**: pseudo terminal the hosted UI reads from and writes to
//! - **runtime**: contract a hosted UI implements to be mounted
//! - **session**: per-connection state machine and the session registry
//!
//! # Architecture
//!
//! ```text
//! SessionManager
//! └── Session (one per connection)
//!     ├── PseudoTerminal (input queue + output sink)
//!     └── UI instance (mounted on the PseudoTerminal)
//! ```

pub mod codec;
pub mod device;
pub mod runtime;
pub mod session;

pub use codec::{Dimensions, Framing, WireMessage};
pub use device::PseudoTerminal;
pub use runtime::{LocalTask, TerminalApp};
pub use session::SessionManager;
