//! CLI subcommand implementations.

pub mod admin;
pub mod leaderboard;
pub mod rank;
pub mod reward;
pub mod run;
pub mod settings;
pub mod status;
