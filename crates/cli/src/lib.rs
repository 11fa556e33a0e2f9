//! `saltctl` command-line front end.
//!
//! Parses arguments, resolves settings, and drives one dispatch through
//! [`saltctl_client`], printing each result batch as it arrives.

pub mod args;
pub mod exit;
pub mod run;

pub use args::{Cli, Command};
pub use run::run;
