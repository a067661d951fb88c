//! Leveling engine library.
//!
//! Voice presence tracking, XP awarding and reward dispatch on top of
//! `lvl-core` and `lvl-db`, plus the CLI surface of the `lvl` binary.

mod cli;
pub mod commands;
mod config;
pub mod dispatch;
pub mod engine;
pub mod ledger;
pub mod platform;
pub mod replay;
pub mod tracker;

pub use cli::{Axis, Cli, Commands, ConfigAction, RankBy, RewardAction, Scope};
pub use config::Config;
pub use dispatch::{Announce, DispatchReport, RewardDispatcher};
pub use engine::{Engine, EngineError, EventOutcome, KnownRoles};
pub use platform::{Notifier, PlatformError, VoiceDirectory};
pub use tracker::VoiceTracker;
