//! CLI subcommand implementations.

pub mod import;
pub mod inspect;
pub mod sessions;
pub mod status;
