//! Command-line arguments.

use std::path::PathBuf;

use clap::{ArgAction, Parser, Subcommand};
use saltctl_core::config::SettingsOverrides;
use saltctl_core::types::WorkRequest;

/// Function sent by `info`.
const GRAINS_FUN: &str = "grains.items";

#[derive(Debug, Parser)]
#[command(name = "saltctl", version)]
#[command(about = "Run salt execution functions through salt-api")]
#[command(
    after_help = "<config dir>/config is JSON that can set server, user, timeout, eauth and poll_interval."
)]
pub struct Cli {
    /// Directory holding the config file and the token cache
    #[arg(short = 'c', long, env = "SALTCTL_CONFIG_DIR", value_name = "DIR")]
    pub config_dir: Option<PathBuf>,

    /// Username to authenticate with
    #[arg(short = 'u', long, env = "SALTCTL_USER")]
    pub user: Option<String>,

    /// salt-api server URL
    #[arg(short = 's', long, env = "SALTCTL_SERVER", value_name = "URL")]
    pub server: Option<String>,

    /// Seconds to wait for results
    #[arg(short = 't', long, env = "SALTCTL_TIMEOUT", value_name = "SECS")]
    pub timeout: Option<f64>,

    /// eauth module to use
    #[arg(short = 'a', long, env = "SALTCTL_EAUTH")]
    pub eauth: Option<String>,

    /// Seconds between polls of a running job
    #[arg(long, env = "SALTCTL_POLL_INTERVAL", value_name = "SECS")]
    pub poll_interval: Option<f64>,

    /// Force re-authentication before dispatching
    #[arg(short = 'r', long)]
    pub reauth: bool,

    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short = 'v', long, action = ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, PartialEq, Eq, Subcommand)]
pub enum Command {
    /// Execute a function on target minions
    #[command(visible_alias = "e")]
    Exec {
        /// Target selector, e.g. '*' or 'web*'
        tgt: String,
        /// Execution function, e.g. test.ping
        fun: String,
        /// Positional arguments passed to the function
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },

    /// Return grains of target minions
    #[command(visible_alias = "i")]
    Info {
        /// Target selector
        tgt: String,
    },
}

impl Command {
    /// The lowstate batch this command submits.
    pub fn requests(&self) -> Vec<WorkRequest> {
        match self {
            Command::Exec { tgt, fun, args } => {
                vec![WorkRequest::local_async(tgt.as_str(), fun.as_str(), args.clone())]
            }
            Command::Info { tgt } => vec![WorkRequest::local(tgt.as_str(), GRAINS_FUN, vec![])],
        }
    }
}

impl Cli {
    /// Flags and environment values that take precedence over the config file.
    pub fn overrides(&self) -> SettingsOverrides {
        SettingsOverrides {
            server: self.server.clone(),
            user: self.user.clone(),
            eauth: self.eauth.clone(),
            timeout_secs: self.timeout,
            poll_interval_secs: self.poll_interval,
        }
    }

    /// Default `tracing` filter for the chosen verbosity.
    pub fn log_filter(&self) -> &'static str {
        match self.verbose {
            0 => "saltctl=warn",
            1 => "saltctl=info",
            _ => "saltctl=debug",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use saltctl_core::types::ClientMode;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(args).unwrap()
    }

    #[test]
    fn exec_builds_async_request_with_args() {
        let cli = parse(&["saltctl", "exec", "web*", "cmd.run", "uptime", "-p"]);
        let requests = cli.command.requests();

        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].client, ClientMode::LocalAsync);
        assert_eq!(requests[0].target, "web*");
        assert_eq!(requests[0].fun, "cmd.run");
        assert_eq!(requests[0].arg, vec!["uptime", "-p"]);
    }

    #[test]
    fn short_aliases_match_long_commands() {
        assert_eq!(
            parse(&["saltctl", "e", "*", "test.ping"]).command,
            parse(&["saltctl", "exec", "*", "test.ping"]).command
        );
        assert_eq!(
            parse(&["saltctl", "i", "db1"]).command,
            Command::Info { tgt: "db1".into() }
        );
    }

    #[test]
    fn info_asks_for_grains() {
        let requests = parse(&["saltctl", "info", "db1"]).command.requests();
        assert_eq!(requests[0].client, ClientMode::Local);
        assert_eq!(requests[0].fun, GRAINS_FUN);
        assert!(requests[0].arg.is_empty());
    }

    #[test]
    fn global_flags_become_overrides() {
        let cli = parse(&[
            "saltctl", "-s", "https://master:8000", "-u", "ops", "-t", "5", "-a", "ldap", "-r",
            "info", "*",
        ]);
        let overrides = cli.overrides();

        assert_eq!(overrides.server.as_deref(), Some("https://master:8000"));
        assert_eq!(overrides.user.as_deref(), Some("ops"));
        assert_eq!(overrides.eauth.as_deref(), Some("ldap"));
        assert_eq!(overrides.timeout_secs, Some(5.0));
        assert!(cli.reauth);
    }

    #[test]
    fn verbosity_selects_filter() {
        assert_eq!(parse(&["saltctl", "i", "*"]).log_filter(), "saltctl=warn");
        assert_eq!(parse(&["saltctl", "-v", "i", "*"]).log_filter(), "saltctl=info");
        assert_eq!(parse(&["saltctl", "-vv", "i", "*"]).log_filter(), "saltctl=debug");
    }

    #[test]
    fn exec_requires_target_and_function() {
        assert!(Cli::try_parse_from(["saltctl", "exec", "*"]).is_err());
        assert!(Cli::try_parse_from(["saltctl"]).is_err());
        assert!(Cli::try_parse_from(["saltctl", "help-me"]).is_err());
    }
}
