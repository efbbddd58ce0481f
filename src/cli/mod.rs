//! CLI subcommands

pub mod check;
pub mod map;
pub mod start;
pub mod status;
pub mod stop;
pub mod templates;
