mod auth;
mod backend;
mod config;
mod session;

use std::ffi::OsString;
use std::io::Write;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::auth::{AuthorizationHook, Decision, DenyReason};
use crate::session::TemplatePolicy;

const CONFIG_ENV: &str = "GATEHOOK_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "/etc/gatehook/config.yaml";

// ---------------------------------------------------------------------------
// CLI
// ---------------------------------------------------------------------------

/// Invoked by the SSH gateway once per connection attempt as
/// `gatehook ACCOUNT [KEYS]...`.  Prints a single JSON decision on stdout;
/// diagnostics go to stderr.
///
/// Every argument is client-controlled, so none of them is ever read as an
/// option.  The config path comes from `GATEHOOK_CONFIG` and the log level
/// from `RUST_LOG`.
#[derive(Parser, Debug)]
#[command(
    name = "gatehook",
    about = "SSH-to-container gateway authorization hook",
    disable_help_flag = true,
    disable_version_flag = true
)]
struct Cli {
    /// Account the client is connecting to, then the public keys it
    /// presented, tried in order.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    args: Vec<String>,
}

impl Cli {
    /// Parse `argv` with everything after the program name taken verbatim.
    fn parse_args<I, T>(argv: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString>,
    {
        let mut argv = argv.into_iter().map(Into::into);
        let program = argv.next().unwrap_or_else(|| OsString::from("gatehook"));
        // A leading `--` ends option parsing, so even a literal `--` account
        // arrives as a value.
        Self::try_parse_from(
            std::iter::once(program)
                .chain(std::iter::once(OsString::from("--")))
                .chain(argv),
        )
    }

    fn account(&self) -> &str {
        self.args.first().map(String::as_str).unwrap_or_default()
    }

    fn keys(&self) -> &[String] {
        self.args.get(1..).unwrap_or_default()
    }
}

fn config_path() -> String {
    std::env::var(CONFIG_ENV)
        .ok()
        .filter(|path| !path.is_empty())
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string())
}

// ---------------------------------------------------------------------------
// Tracing
// ---------------------------------------------------------------------------

fn init_tracing() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(std::io::stderr),
        )
        .init();
}

// ---------------------------------------------------------------------------
// Hook
// ---------------------------------------------------------------------------

async fn run(cli: &Cli, config_path: &str) -> Result<Decision> {
    let config = config::load_config(config_path)?;

    let (validator, inventory) = backend::build_backends(&config.services)?;
    let policy = Arc::new(TemplatePolicy::from_config(config.session));
    let hook = AuthorizationHook::new(validator, inventory, policy);

    Ok(hook.authorize(cli.account(), cli.keys()).await)
}

/// Write `decision` to stdout as one JSON document followed by a newline.
fn emit(decision: &Decision) -> Result<()> {
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    serde_json::to_writer(&mut out, decision).context("failed to serialise decision")?;
    writeln!(out).context("failed to write decision")?;
    out.flush().context("failed to flush stdout")?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = match Cli::parse_args(std::env::args_os()) {
        Ok(cli) => cli,
        Err(e) => {
            // The gateway still needs a decision it can parse.
            let _ = e.print();
            let _ = emit(&Decision::denied(DenyReason::Misconfigured));
            return ExitCode::from(2);
        }
    };

    init_tracing();
    let config_path = config_path();
    tracing::debug!(%config_path, "starting gatehook");

    let (decision, status) = match run(&cli, &config_path).await {
        Ok(decision) => (decision, ExitCode::SUCCESS),
        Err(e) => {
            tracing::error!(error = %format!("{e:#}"), "hook could not start");
            (Decision::denied(DenyReason::Misconfigured), ExitCode::FAILURE)
        }
    };

    tracing::debug!(allowed = decision.is_allowed(), "emitting decision");
    if let Err(e) = emit(&decision) {
        tracing::error!(error = %format!("{e:#}"), "failed to emit decision");
        return ExitCode::FAILURE;
    }
    status
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::io::Write as _;

    use clap::CommandFactory;

    use super::*;

    /// Config pointing both services at a closed port: any request would
    /// fail with "http error" rather than "no ssh key".
    fn services_config() -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(
            b"services:\n  accounts:\n    api_url: http://127.0.0.1:9/\n  inventory:\n    api_url: http://127.0.0.1:9/\n",
        )
        .unwrap();
        file
    }

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn account_then_keys() {
        let cli = Cli::parse_args([
            "gatehook",
            "u123",
            "ssh-ed25519 AAAA one",
            "ssh-rsa BBBB two",
        ])
        .unwrap();
        assert_eq!(cli.account(), "u123");
        assert_eq!(cli.keys(), ["ssh-ed25519 AAAA one", "ssh-rsa BBBB two"]);
    }

    #[test]
    fn no_arguments_is_accepted() {
        let cli = Cli::parse_args(["gatehook"]).unwrap();
        assert_eq!(cli.account(), "");
        assert!(cli.keys().is_empty());
    }

    #[test]
    fn option_like_account_is_not_an_option() {
        let cli = Cli::parse_args(["gatehook", "-c/tmp/evil.yaml", "ssh-ed25519 AAAA k"]).unwrap();
        assert_eq!(cli.account(), "-c/tmp/evil.yaml");
        assert_eq!(cli.keys(), ["ssh-ed25519 AAAA k"]);
    }

    #[test]
    fn help_and_version_are_plain_accounts() {
        for flag in ["-h", "--help", "-V", "--version", "--"] {
            let cli = Cli::parse_args(["gatehook", flag, "k"]).unwrap();
            assert_eq!(cli.account(), flag);
            assert_eq!(cli.keys(), ["k"]);
        }
    }

    #[test]
    fn option_like_keys_are_kept() {
        let cli = Cli::parse_args(["gatehook", "u123", "--config", "-v", "--"]).unwrap();
        assert_eq!(cli.account(), "u123");
        assert_eq!(cli.keys(), ["--config", "-v", "--"]);
    }

    #[test]
    fn config_path_from_environment() {
        std::env::remove_var(CONFIG_ENV);
        assert_eq!(config_path(), DEFAULT_CONFIG_PATH);
        std::env::set_var(CONFIG_ENV, "");
        assert_eq!(config_path(), DEFAULT_CONFIG_PATH);
        std::env::set_var(CONFIG_ENV, "/tmp/hook.yaml");
        assert_eq!(config_path(), "/tmp/hook.yaml");
        std::env::remove_var(CONFIG_ENV);
    }

    #[tokio::test]
    async fn version_account_yields_a_decision() {
        let file = services_config();
        let path = file.path().to_str().unwrap().to_string();

        let cli = Cli::parse_args(["gatehook", "--version"]).unwrap();
        let decision = run(&cli, &path).await.unwrap();
        assert_eq!(
            serde_json::to_string(&decision).unwrap(),
            r#"{"allowed":false,"message":"no ssh key"}"#
        );
    }

    #[tokio::test]
    async fn missing_config_fails_to_start() {
        let cli = Cli::parse_args(["gatehook", "u123", "key"]).unwrap();
        assert!(run(&cli, "/nonexistent/gatehook.yaml").await.is_err());
    }

    #[tokio::test]
    async fn no_keys_is_denied_without_reaching_services() {
        let file = services_config();
        let path = file.path().to_str().unwrap().to_string();

        let cli = Cli::parse_args(["gatehook", "u123"]).unwrap();
        let decision = run(&cli, &path).await.unwrap();
        assert_eq!(
            serde_json::to_string(&decision).unwrap(),
            r#"{"allowed":false,"message":"no ssh key"}"#
        );
    }
}
