use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::session::template;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub services: ServicesConfig,
    #[serde(default)]
    pub session: SessionConfig,
}

// ---------------------------------------------------------------------------
// External services
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct ServicesConfig {
    /// Upper bound (seconds) on every outbound request.  A request that runs
    /// past it is treated as a failed service call.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    /// Account service answering "is this key valid for this account".
    pub accounts: ServiceEndpoint,
    /// Compute inventory resolving an account to its backing server.
    pub inventory: ServiceEndpoint,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceEndpoint {
    /// Full URL of the API root (e.g. `https://accounts.internal/api/v1`).
    pub api_url: String,
    /// Name of the environment variable holding the bearer token for this
    /// service.  Defaults per service (see [`ServicesConfig::apply_defaults`]);
    /// requests go out unauthenticated when the variable is unset or empty.
    #[serde(default)]
    pub token_env: Option<String>,
}

const DEFAULT_ACCOUNTS_TOKEN_ENV: &str = "GATEHOOK_ACCOUNTS_TOKEN";
const DEFAULT_INVENTORY_TOKEN_ENV: &str = "GATEHOOK_INVENTORY_TOKEN";

impl ServicesConfig {
    /// Fill per-service defaults that a shared [`ServiceEndpoint`] field
    /// default cannot express.
    fn apply_defaults(&mut self) {
        self.accounts
            .token_env
            .get_or_insert_with(|| DEFAULT_ACCOUNTS_TOKEN_ENV.to_string());
        self.inventory
            .token_env
            .get_or_insert_with(|| DEFAULT_INVENTORY_TOKEN_ENV.to_string());
    }
}

fn default_request_timeout() -> u64 {
    10
}

// ---------------------------------------------------------------------------
// Session derivation
// ---------------------------------------------------------------------------

/// Templates and limits used to derive a container session from an account
/// and its resolved server.
///
/// Every string field except `architectures` and `base_version` accepts the
/// placeholders documented in [`crate::session::template`].
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub image: String,
    pub base_version: String,
    /// Server architecture name -> image platform tag.
    pub architectures: BTreeMap<String, String>,
    pub container_name: String,
    pub hostname: String,
    /// Pass `--rm` so the container is removed on exit.
    pub ephemeral: bool,
    /// Pass `-it` for an interactive terminal.
    pub interactive: bool,
    pub volumes: Vec<VolumeConfig>,
    pub memory: Option<String>,
    pub cpu_shares: Option<u32>,
    pub run_as: Option<String>,
    pub extra_run_args: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub command: Vec<String>,
    pub remote_user: String,
    pub user: Option<String>,
    pub entrypoint: Option<String>,
    pub docker_exec_args: Vec<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        let storage = "/storage/users/{account}";
        Self {
            image: "local_web/alpine:{platform}-{base_version}".to_string(),
            base_version: "3.3".to_string(),
            architectures: BTreeMap::from([
                ("arm".to_string(), "armhf".to_string()),
                ("x86_64".to_string(), "amd64".to_string()),
            ]),
            container_name: "ssh2docker_{account}".to_string(),
            hostname: "{server.name}".to_string(),
            ephemeral: true,
            interactive: true,
            volumes: vec![
                VolumeConfig::new(format!("{storage}/ftp"), "/ftp", VolumeMode::Rw),
                VolumeConfig::new(format!("{storage}/backups"), "/ftp/backups", VolumeMode::Ro),
                VolumeConfig::new(format!("{storage}/logs"), "/ftp/logs", VolumeMode::Ro),
                VolumeConfig::new(format!("{storage}/websites"), "/ftp/websites", VolumeMode::Rw),
            ],
            memory: Some("256m".to_string()),
            // Half of the runtime's default weight of 1024.
            cpu_shares: Some(512),
            run_as: Some("webuser".to_string()),
            extra_run_args: Vec::new(),
            env: BTreeMap::from([
                (
                    "DOCKER_HOST".to_string(),
                    "tcp://{server.id}.local:2376".to_string(),
                ),
                ("DOCKER_TLS_VERIFY".to_string(), "1".to_string()),
                (
                    "DOCKER_CERT_PATH".to_string(),
                    "/opt/docker-tls/{server.hostname}/.docker/".to_string(),
                ),
            ]),
            command: vec!["/bin/sh".to_string(), "-i".to_string(), "-l".to_string()],
            remote_user: "{account}".to_string(),
            user: None,
            entrypoint: None,
            docker_exec_args: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct VolumeConfig {
    pub source: String,
    pub target: String,
    #[serde(default = "default_volume_mode")]
    pub mode: VolumeMode,
}

impl VolumeConfig {
    fn new(source: String, target: &str, mode: VolumeMode) -> Self {
        Self {
            source,
            target: target.to_string(),
            mode,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VolumeMode {
    Rw,
    Ro,
}

impl VolumeMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Rw => "rw",
            Self::Ro => "ro",
        }
    }
}

fn default_volume_mode() -> VolumeMode {
    VolumeMode::Rw
}

// ---------------------------------------------------------------------------
// Loader
// ---------------------------------------------------------------------------

/// Load and validate a [`Config`] from a YAML file at `path`.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file: {}", path.display()))?;
    let mut config: Config = serde_yaml::from_str(&contents)
        .with_context(|| format!("failed to parse config file: {}", path.display()))?;
    config.services.apply_defaults();
    validate_config(&config)?;
    Ok(config)
}

/// Sanity checks that cannot be expressed purely with serde.
fn validate_config(config: &Config) -> Result<()> {
    anyhow::ensure!(
        config.services.request_timeout_secs > 0,
        "request_timeout_secs must be greater than zero"
    );
    for (name, endpoint) in [
        ("accounts", &config.services.accounts),
        ("inventory", &config.services.inventory),
    ] {
        reqwest::Url::parse(&endpoint.api_url)
            .with_context(|| format!("services.{name}.api_url is not a valid URL"))?;
    }

    let session = &config.session;
    anyhow::ensure!(!session.command.is_empty(), "session.command must not be empty");
    anyhow::ensure!(
        !session.architectures.is_empty(),
        "session.architectures must map at least one architecture"
    );

    for (field, value) in session_templates(session) {
        template::validate(value)
            .with_context(|| format!("invalid template in session.{field}: {value:?}"))?;
    }
    Ok(())
}

/// Every templated string in the session config, paired with a field label
/// for error messages.
fn session_templates(session: &SessionConfig) -> Vec<(String, &str)> {
    let mut out: Vec<(String, &str)> = vec![
        ("image".to_string(), session.image.as_str()),
        ("container_name".to_string(), session.container_name.as_str()),
        ("hostname".to_string(), session.hostname.as_str()),
        ("remote_user".to_string(), session.remote_user.as_str()),
    ];
    for (i, volume) in session.volumes.iter().enumerate() {
        out.push((format!("volumes[{i}].source"), volume.source.as_str()));
        out.push((format!("volumes[{i}].target"), volume.target.as_str()));
    }
    for (i, arg) in session.extra_run_args.iter().enumerate() {
        out.push((format!("extra_run_args[{i}]"), arg.as_str()));
    }
    for (key, value) in &session.env {
        out.push((format!("env.{key}"), value.as_str()));
    }
    for (i, arg) in session.command.iter().enumerate() {
        out.push((format!("command[{i}]"), arg.as_str()));
    }
    for (i, arg) in session.docker_exec_args.iter().enumerate() {
        out.push((format!("docker_exec_args[{i}]"), arg.as_str()));
    }
    if let Some(memory) = &session.memory {
        out.push(("memory".to_string(), memory.as_str()));
    }
    if let Some(run_as) = &session.run_as {
        out.push(("run_as".to_string(), run_as.as_str()));
    }
    if let Some(user) = &session.user {
        out.push(("user".to_string(), user.as_str()));
    }
    if let Some(entrypoint) = &session.entrypoint {
        out.push(("entrypoint".to_string(), entrypoint.as_str()));
    }
    out
}
