//! `saltctl` -- run salt execution functions through salt-api.
//!
//! ```text
//! saltctl [-c DIR] [-u USER] [-s URL] [-t SECS] [-a EAUTH] [-r] [-v] exec|e <tgt> <fun> [arg...]
//! saltctl [options] info|i <tgt>
//! ```
//!
//! # Environment variables
//!
//! | Variable                | Default               | Description                       |
//! |-------------------------|-----------------------|-----------------------------------|
//! | `SALTCTL_CONFIG_DIR`    | `~/.config/saltctl`   | Config file and token cache       |
//! | `SALTCTL_SERVER`        | `https://salt:8000`   | salt-api origin                   |
//! | `SALTCTL_USER`          | `$USER`               | Login username                    |
//! | `SALTCTL_EAUTH`         | `pam`                 | eauth module                      |
//! | `SALTCTL_TIMEOUT`       | `60`                  | Seconds to wait for results       |
//! | `SALTCTL_POLL_INTERVAL` | `2`                   | Seconds between job polls         |
//! | `RUST_LOG`              | `saltctl=warn`        | Log filter, overrides `-v`        |

use std::process::ExitCode;

use clap::Parser;
use saltctl_cli::exit::{exit_code, EXIT_FAILURE, EXIT_OK};
use saltctl_cli::Cli;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            return if e.use_stderr() {
                ExitCode::from(EXIT_FAILURE)
            } else {
                ExitCode::from(EXIT_OK)
            };
        }
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| cli.log_filter().into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    match saltctl_cli::run(cli).await {
        Ok(()) => ExitCode::from(EXIT_OK),
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::from(exit_code(&e))
        }
    }
}
