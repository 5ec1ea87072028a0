//! HTTP control surface
//!
//! Every mutating endpoint is translated into a [`DaemonEvent`] or a
//! [`ControlCommand`] for the daemon loop; handlers never touch daemon state
//! directly.
//!
//! [`DaemonEvent`]: crate::runtime::DaemonEvent
//! [`ControlCommand`]: crate::runtime::ControlCommand

pub mod handlers;
pub mod server;
pub mod sse;

pub use server::{router, serve, AppContext};
