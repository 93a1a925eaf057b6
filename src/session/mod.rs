//! Container session derivation.
//!
//! Turns an authorised account and its resolved [`AccountServer`] into the
//! [`SessionSpec`] the gateway uses to start the container.  The derivation
//! sits behind the [`SessionPolicy`] trait; [`TemplatePolicy`] is the
//! config-driven implementation, and the architecture-to-platform mapping it
//! uses is itself injectable through [`PlatformTagger`].

pub mod template;

use std::collections::BTreeMap;

use serde::Serialize;
use thiserror::Error;

use crate::backend::AccountServer;
use crate::config::SessionConfig;

use self::template::{TemplateContext, TemplateError};

// ---------------------------------------------------------------------------
// Session spec
// ---------------------------------------------------------------------------

/// Everything needed to start an isolated per-account container session.
///
/// Field names serialise to the kebab-case keys the gateway reads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct SessionSpec {
    pub remote_user: String,
    pub image_name: String,
    pub docker_run_args: Vec<String>,
    /// Ordered so that identical inputs always serialise identically.
    pub env: BTreeMap<String, String>,
    pub command: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entrypoint: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub docker_exec_args: Vec<String>,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PolicyError {
    #[error("no platform tag configured for architecture {0:?}")]
    UnknownArchitecture(String),
    #[error("unsafe {label}: {value:?}")]
    UnsafePathSegment { label: &'static str, value: String },
    #[error("session command rendered empty")]
    EmptyCommand,
    #[error(transparent)]
    Template(#[from] TemplateError),
}

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// Derives a [`SessionSpec`] for an authorised account.
///
/// Implementations must be deterministic: the same account and server must
/// always produce the same spec.
pub trait SessionPolicy: Send + Sync {
    fn build(&self, account: &str, server: &AccountServer) -> Result<SessionSpec, PolicyError>;
}

/// Maps a server architecture name to the platform tag used in image names.
pub trait PlatformTagger: Send + Sync {
    fn platform_tag(&self, architecture: &str) -> Option<String>;
}

/// Lookup-table [`PlatformTagger`] loaded from `session.architectures`.
#[derive(Debug, Clone, Default)]
pub struct ArchitectureTable(BTreeMap<String, String>);

impl ArchitectureTable {
    pub fn new(table: BTreeMap<String, String>) -> Self {
        Self(table)
    }
}

impl PlatformTagger for ArchitectureTable {
    fn platform_tag(&self, architecture: &str) -> Option<String> {
        self.0.get(architecture).cloned()
    }
}

// ---------------------------------------------------------------------------
// Path-segment safety
// ---------------------------------------------------------------------------

/// Validate that a value interpolated into filesystem paths is a single safe
/// segment.
///
/// Rejects empty values, `.`, `..`, and anything containing `/`, `\` or NUL.
pub fn validate_path_segment(segment: &str, label: &'static str) -> Result<(), PolicyError> {
    if segment.is_empty()
        || segment == "."
        || segment == ".."
        || segment.contains('/')
        || segment.contains('\\')
        || segment.contains('\0')
    {
        return Err(PolicyError::UnsafePathSegment {
            label,
            value: segment.to_string(),
        });
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Template policy
// ---------------------------------------------------------------------------

/// [`SessionPolicy`] driven by the templates in [`SessionConfig`].
pub struct TemplatePolicy {
    config: SessionConfig,
    tagger: Box<dyn PlatformTagger>,
}

impl TemplatePolicy {
    /// Build a policy that maps architectures through `config.architectures`.
    pub fn from_config(config: SessionConfig) -> Self {
        let tagger = ArchitectureTable::new(config.architectures.clone());
        Self::with_tagger(config, Box::new(tagger))
    }

    /// Build a policy with a caller-supplied architecture mapping.
    pub fn with_tagger(config: SessionConfig, tagger: Box<dyn PlatformTagger>) -> Self {
        Self { config, tagger }
    }

    fn run_args(&self, ctx: &TemplateContext<'_>) -> Result<Vec<String>, PolicyError> {
        let cfg = &self.config;
        let render = |t: &str| template::render(t, ctx);

        let mut args = vec![
            "--name".to_string(),
            render(&cfg.container_name)?,
            "--hostname".to_string(),
            render(&cfg.hostname)?,
        ];
        if cfg.ephemeral {
            args.push("--rm".to_string());
        }
        if cfg.interactive {
            args.push("-it".to_string());
        }
        for volume in &cfg.volumes {
            args.push("-v".to_string());
            args.push(format!(
                "{}:{}:{}",
                render(&volume.source)?,
                render(&volume.target)?,
                volume.mode.as_str()
            ));
        }
        if let Some(memory) = &cfg.memory {
            args.push("-m".to_string());
            args.push(render(memory)?);
        }
        if let Some(shares) = cfg.cpu_shares {
            args.push("--cpu-shares".to_string());
            args.push(shares.to_string());
        }
        if let Some(run_as) = &cfg.run_as {
            args.push("-u".to_string());
            args.push(render(run_as)?);
        }
        for extra in &cfg.extra_run_args {
            args.push(render(extra)?);
        }
        Ok(args)
    }
}

impl SessionPolicy for TemplatePolicy {
    fn build(&self, account: &str, server: &AccountServer) -> Result<SessionSpec, PolicyError> {
        validate_path_segment(account, "account")?;
        validate_path_segment(&server.hostname, "server hostname")?;
        validate_path_segment(&server.id, "server id")?;

        let platform = self
            .tagger
            .platform_tag(&server.architecture)
            .ok_or_else(|| PolicyError::UnknownArchitecture(server.architecture.clone()))?;

        let cfg = &self.config;
        let ctx = TemplateContext {
            account,
            platform: &platform,
            base_version: &cfg.base_version,
            server,
        };
        let render = |t: &str| template::render(t, &ctx);
        let render_all = |ts: &[String]| -> Result<Vec<String>, TemplateError> {
            ts.iter().map(|t| render(t)).collect()
        };

        let command = render_all(&cfg.command)?;
        if command.is_empty() {
            return Err(PolicyError::EmptyCommand);
        }

        let env = cfg
            .env
            .iter()
            .map(|(k, v)| -> Result<(String, String), TemplateError> {
                Ok((k.clone(), render(v)?))
            })
            .collect::<Result<BTreeMap<_, _>, _>>()?;

        Ok(SessionSpec {
            remote_user: render(&cfg.remote_user)?,
            image_name: render(&cfg.image)?,
            docker_run_args: self.run_args(&ctx)?,
            env,
            command,
            user: cfg.user.as_deref().map(render).transpose()?,
            entrypoint: cfg.entrypoint.as_deref().map(render).transpose()?,
            docker_exec_args: render_all(&cfg.docker_exec_args)?,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
