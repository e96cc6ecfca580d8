//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Background task start:
//!     Shutdown::new → subscribe → spawn task holding the receiver
//!
//! Stop:
//!     Shutdown::trigger → every subscribed task leaves its loop
//! ```

pub mod shutdown;

pub use shutdown::Shutdown;
