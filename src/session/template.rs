//! Placeholder substitution for session templates.
//!
//! Recognised placeholders:
//!
//! | Placeholder         | Value                                    |
//! |---------------------|------------------------------------------|
//! | `{account}`         | account identifier                       |
//! | `{platform}`        | platform tag mapped from the server arch |
//! | `{base_version}`    | configured base image version            |
//! | `{server.arch}`     | server architecture as reported          |
//! | `{server.hostname}` | server hostname                          |
//! | `{server.id}`       | server id                                |
//! | `{server.name}`     | server display name                      |
//!
//! `{{` and `}}` produce literal braces.

use thiserror::Error;

use crate::backend::AccountServer;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemplateError {
    #[error("unknown placeholder {{{0}}}")]
    UnknownPlaceholder(String),
    #[error("unterminated placeholder starting at byte {0}")]
    Unterminated(usize),
    #[error("unmatched '}}' at byte {0}")]
    UnmatchedBrace(usize),
}

/// Values available to a template.
#[derive(Debug, Clone, Copy)]
pub struct TemplateContext<'a> {
    pub account: &'a str,
    pub platform: &'a str,
    pub base_version: &'a str,
    pub server: &'a AccountServer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Placeholder {
    Account,
    Platform,
    BaseVersion,
    ServerArch,
    ServerHostname,
    ServerId,
    ServerName,
}

impl Placeholder {
    fn parse(name: &str) -> Result<Self, TemplateError> {
        match name.trim() {
            "account" => Ok(Self::Account),
            "platform" => Ok(Self::Platform),
            "base_version" => Ok(Self::BaseVersion),
            "server.arch" => Ok(Self::ServerArch),
            "server.hostname" => Ok(Self::ServerHostname),
            "server.id" => Ok(Self::ServerId),
            "server.name" => Ok(Self::ServerName),
            other => Err(TemplateError::UnknownPlaceholder(other.to_string())),
        }
    }

    fn value<'a>(&self, ctx: &TemplateContext<'a>) -> &'a str {
        match self {
            Self::Account => ctx.account,
            Self::Platform => ctx.platform,
            Self::BaseVersion => ctx.base_version,
            Self::ServerArch => &ctx.server.architecture,
            Self::ServerHostname => &ctx.server.hostname,
            Self::ServerId => &ctx.server.id,
            Self::ServerName => &ctx.server.name,
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Placeholder(Placeholder),
}

fn parse(template: &str) -> Result<Vec<Segment>, TemplateError> {
    let mut segments = Vec::new();
    let mut literal = String::new();
    let mut chars = template.char_indices().peekable();

    while let Some((pos, c)) = chars.next() {
        match c {
            '{' if chars.peek().map(|&(_, next)| next) == Some('{') => {
                chars.next();
                literal.push('{');
            }
            '}' if chars.peek().map(|&(_, next)| next) == Some('}') => {
                chars.next();
                literal.push('}');
            }
            '{' => {
                let rest = &template[pos + 1..];
                let end = rest.find('}').ok_or(TemplateError::Unterminated(pos))?;
                let placeholder = Placeholder::parse(&rest[..end])?;
                if !literal.is_empty() {
                    segments.push(Segment::Literal(std::mem::take(&mut literal)));
                }
                segments.push(Segment::Placeholder(placeholder));
                // Skip the name and the closing brace.
                for _ in 0..rest[..=end].chars().count() {
                    chars.next();
                }
            }
            '}' => return Err(TemplateError::UnmatchedBrace(pos)),
            _ => literal.push(c),
        }
    }
    if !literal.is_empty() {
        segments.push(Segment::Literal(literal));
    }
    Ok(segments)
}

/// Check that `template` is well formed and only uses known placeholders.
pub fn validate(template: &str) -> Result<(), TemplateError> {
    parse(template).map(|_| ())
}

/// Substitute every placeholder in `template` from `ctx`.
pub fn render(template: &str, ctx: &TemplateContext<'_>) -> Result<String, TemplateError> {
    let mut out = String::with_capacity(template.len());
    for segment in parse(template)? {
        match segment {
            Segment::Literal(text) => out.push_str(&text),
            Segment::Placeholder(p) => out.push_str(p.value(ctx)),
        }
    }
    Ok(out)
}
