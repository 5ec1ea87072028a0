//! # Notification Sound Daemon (ntsv-daemon)
//!
//! Arbitrates notification sounds: at most one notification owns the audio
//! slot; newcomers preempt, queue or are rejected by handler priority, and
//! each audible notification negotiates with the system audio-policy
//! authority before it plays.
//!
//! **Architecture:** one tokio task owns all state ([`runtime::Daemon`]);
//! collaborators (audio sink, tone service, policy authority, profile,
//! transcoder) sit behind traits and report back through the loop channel.
//! The HTTP control surface lives in [`api`].

pub mod api;
pub mod config;
pub mod error;
pub mod facade;
pub mod notification;
pub mod playback;
pub mod policy;
pub mod runtime;
pub mod services;

pub use config::DaemonConfig;
pub use error::{Error, Result};
pub use runtime::{Daemon, DaemonEvent, DaemonHandle, DaemonParts, DaemonSettings};
