//! # Notification Sound Common Library (ntsv-common)
//!
//! Types shared between the notification daemon and its clients.
//!
//! **Contents:**
//! - Canonical notification categories and audio-policy classes
//! - Inbound hint → category resolution table
//! - Lifecycle events and the broadcast `EventBus`
//! - Configuration file discovery

pub mod category;
pub mod config;
pub mod error;
pub mod events;

pub use category::{Category, NotificationHints, PolicyClass, PolicyState, ResolvedHints};
pub use error::{Error, Result};
