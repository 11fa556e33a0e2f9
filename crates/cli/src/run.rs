//! One invocation: settings, session, dispatch, output.

use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use reqwest::Url;
use saltctl_client::session::TerminalPrompt;
use saltctl_client::{
    submit_with_reauth, ClientError, ClosePolicy, Credentials, DispatchOptions, SecretPrompt,
    SessionManager, TokenStore,
};
use saltctl_core::config::{default_config_dir, FileConfig, Settings};
use saltctl_core::types::ResultRecord;

use crate::args::Cli;

/// Resolve settings from the config directory, the file in it, and `cli`.
pub fn load_settings(cli: &Cli) -> anyhow::Result<Settings> {
    let config_dir: PathBuf = cli.config_dir.clone().unwrap_or_else(default_config_dir);
    let file = FileConfig::load(&config_dir)
        .with_context(|| format!("failed to read config in {}", config_dir.display()))?;
    let settings = Settings::resolve(config_dir, cli.overrides(), file)?;
    Ok(settings)
}

/// Parse the configured server into an origin URL.
pub fn server_origin(server: &str) -> Result<Url, ClientError> {
    let origin = Url::parse(server).map_err(|e| ClientError::InvalidUrl {
        url: server.to_string(),
        reason: e.to_string(),
    })?;
    if !matches!(origin.scheme(), "http" | "https") {
        return Err(ClientError::InvalidUrl {
            url: server.to_string(),
            reason: format!("unsupported scheme '{}'", origin.scheme()),
        });
    }
    Ok(origin)
}

/// Run the command described by `cli`, prompting on the terminal.
pub async fn run(cli: Cli) -> anyhow::Result<()> {
    run_with_prompt(cli, Arc::new(TerminalPrompt), &mut io::stdout()).await
}

/// Run with an explicit secret prompt and output sink.
pub async fn run_with_prompt(
    cli: Cli,
    prompt: Arc<dyn SecretPrompt>,
    out: &mut (dyn Write + Send),
) -> anyhow::Result<()> {
    let settings = load_settings(&cli)?;
    let origin = server_origin(&settings.server)?;

    tracing::info!(
        server = %origin,
        user = %settings.user,
        eauth = %settings.eauth,
        timeout_secs = settings.timeout.as_secs_f64(),
        "Starting saltctl",
    );

    let manager = SessionManager::new(origin, TokenStore::new(settings.token_path()), prompt);
    let credentials = Credentials {
        username: settings.user.clone(),
        eauth: settings.eauth.clone(),
    };

    let session = if cli.reauth {
        manager.authenticate(&credentials).await?
    } else {
        manager.load_cached_session()?
    };
    let mut guard = manager.guard(&session);

    let options = DispatchOptions {
        timeout: settings.timeout,
        poll_interval: settings.poll_interval,
        close_policy: ClosePolicy::default(),
    };
    let requests = cli.command.requests();
    let (_, mut stream) =
        submit_with_reauth(&manager, &credentials, &mut guard, session, options, &requests)
            .await?;

    let mut printed = 0usize;
    while let Some(batch) = stream.next_batch().await {
        print_record(out, &batch)?;
        printed += 1;
    }

    let reason = stream.close_reason();
    let lost = stream.join().await;
    for job in &lost {
        tracing::warn!(jid = %job.jid, reason = %job.reason, "No results for job");
    }
    tracing::info!(batches = printed, lost = lost.len(), ?reason, "Done");

    guard
        .persist()
        .with_context(|| format!("failed to save token to {}", settings.token_path().display()))?;
    Ok(())
}

/// Write `record` as pretty JSON followed by a newline.
pub fn print_record(out: &mut (dyn Write + Send), record: &ResultRecord) -> io::Result<()> {
    serde_json::to_writer_pretty(&mut *out, record)?;
    writeln!(out)?;
    out.flush()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::args::Command;
    use assert_matches::assert_matches;
    use clap::Parser;
    use serde_json::json;

    struct NoPrompt;

    impl SecretPrompt for NoPrompt {
        fn read_secret(&self, _prompt: &str) -> io::Result<String> {
            Err(io::Error::other("no terminal"))
        }
    }

    fn cli(config_dir: &std::path::Path, extra: &[&str]) -> Cli {
        let mut args = vec!["saltctl", "-c", config_dir.to_str().unwrap()];
        args.extend_from_slice(extra);
        Cli::try_parse_from(args).unwrap()
    }

    #[test]
    fn print_record_writes_pretty_json_line() {
        let record: ResultRecord = serde_json::from_value(json!({"minion1": true})).unwrap();
        let mut out = Vec::new();
        print_record(&mut out, &record).unwrap();

        assert_eq!(String::from_utf8(out).unwrap(), "{\n  \"minion1\": true\n}\n");
    }

    #[test]
    fn config_file_is_overridden_by_flags() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(
            tmp.path().join("config"),
            r#"{"server": "https://file:8000", "eauth": "ldap", "timeout": 10}"#,
        )
        .unwrap();

        let settings = load_settings(&cli(tmp.path(), &["-t", "3", "info", "*"])).unwrap();
        assert_eq!(settings.server, "https://file:8000");
        assert_eq!(settings.eauth, "ldap");
        assert_eq!(settings.timeout.as_secs(), 3);
        assert_eq!(settings.token_path(), tmp.path().join("token"));
    }

    #[test]
    fn malformed_config_file_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("config"), "{not json").unwrap();

        assert!(load_settings(&cli(tmp.path(), &["info", "*"])).is_err());
    }

    #[test]
    fn server_must_be_an_http_url() {
        assert!(server_origin("https://salt:8000").is_ok());
        assert_matches!(server_origin("salt:8000"), Err(ClientError::InvalidUrl { .. }));
        assert_matches!(server_origin("not a url"), Err(ClientError::InvalidUrl { .. }));
    }

    #[tokio::test]
    async fn invalid_server_fails_before_any_request() {
        let tmp = tempfile::tempdir().unwrap();
        let cli = cli(tmp.path(), &["-s", "::nope", "exec", "*", "test.ping"]);
        assert_eq!(
            cli.command,
            Command::Exec {
                tgt: "*".into(),
                fun: "test.ping".into(),
                args: vec![],
            }
        );

        let mut out = Vec::new();
        let err = run_with_prompt(cli, Arc::new(NoPrompt), &mut out)
            .await
            .unwrap_err();

        assert_matches!(
            err.downcast_ref::<ClientError>(),
            Some(ClientError::InvalidUrl { .. })
        );
        assert!(out.is_empty());
        assert!(!tmp.path().join("token").exists());
    }
}
