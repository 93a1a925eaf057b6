use serde::{Serialize, Serializer};

use crate::session::SessionSpec;

/// Why access was refused.
///
/// Each reason maps to one fixed public message.  Service error details never
/// reach the message; they are only logged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    /// No account identifier was supplied.
    MissingAccount,
    /// The account identifier is not a safe single path segment.
    InvalidAccount,
    /// Zero candidate keys were presented.
    NoKeyProvided,
    /// The key-validation service failed.
    ValidationServiceError,
    /// Every key was checked and none matched.
    AccessDenied,
    /// The inventory failed to resolve the account's server.
    InventoryResolutionError,
    /// The session could not be derived from the resolved server.
    SessionPolicyError,
    /// The hook could not start (configuration or client setup).
    Misconfigured,
}

impl DenyReason {
    pub fn message(&self) -> &'static str {
        match self {
            Self::MissingAccount => "no account",
            Self::InvalidAccount => "invalid account",
            Self::NoKeyProvided => "no ssh key",
            Self::ValidationServiceError => "http error",
            Self::AccessDenied => "access denied",
            Self::InventoryResolutionError => "error while trying to resolve server",
            Self::SessionPolicyError => "error while preparing session",
            Self::Misconfigured => "hook misconfigured",
        }
    }
}

/// Outcome of one authorization attempt: exactly one of denied or allowed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Denied { reason: DenyReason },
    Allowed { spec: SessionSpec },
}

impl Decision {
    pub fn denied(reason: DenyReason) -> Self {
        Self::Denied { reason }
    }

    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed { .. })
    }
}

/// Wire form read by the gateway.
///
/// ```text
/// {"allowed": false, "message": "..."}
/// {"allowed": true, "remote-user": ..., "image-name": ..., "docker-run-args": [...], "env": {...}, "command": [...]}
/// ```
#[derive(Serialize)]
struct HookResponse<'a> {
    allowed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<&'static str>,
    #[serde(flatten)]
    session: Option<&'a SessionSpec>,
}

impl Serialize for Decision {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let response = match self {
            Self::Denied { reason } => HookResponse {
                allowed: false,
                message: Some(reason.message()),
                session: None,
            },
            Self::Allowed { spec } => HookResponse {
                allowed: true,
                message: None,
                session: Some(spec),
            },
        };
        response.serialize(serializer)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;

    fn spec() -> SessionSpec {
        SessionSpec {
            remote_user: "u123".to_string(),
            image_name: "local_web/alpine:amd64-3.3".to_string(),
            docker_run_args: vec!["--name".to_string(), "ssh2docker_u123".to_string()],
            env: BTreeMap::from([(
                "DOCKER_HOST".to_string(),
                "tcp://42.local:2376".to_string(),
            )]),
            command: vec!["/bin/sh".to_string(), "-i".to_string(), "-l".to_string()],
            user: None,
            entrypoint: None,
            docker_exec_args: Vec::new(),
        }
    }

    #[test]
    fn denied_wire_form() {
        let json = serde_json::to_string(&Decision::denied(DenyReason::AccessDenied)).unwrap();
        assert_eq!(json, r#"{"allowed":false,"message":"access denied"}"#);
    }

    #[test]
    fn no_key_wire_form() {
        let json = serde_json::to_string(&Decision::denied(DenyReason::NoKeyProvided)).unwrap();
        assert_eq!(json, r#"{"allowed":false,"message":"no ssh key"}"#);
    }

    #[test]
    fn allowed_wire_form() {
        let json = serde_json::to_string(&Decision::Allowed { spec: spec() }).unwrap();
        assert_eq!(
            json,
            concat!(
                r#"{"allowed":true,"remote-user":"u123","image-name":"local_web/alpine:amd64-3.3","#,
                r#""docker-run-args":["--name","ssh2docker_u123"],"env":{"DOCKER_HOST":"tcp://42.local:2376"},"#,
                r#""command":["/bin/sh","-i","-l"]}"#
            )
        );
    }

    #[test]
    fn allowed_carries_no_message() {
        let value = serde_json::to_value(Decision::Allowed { spec: spec() }).unwrap();
        assert!(value.get("message").is_none());
        assert_eq!(value["allowed"], true);
    }

    #[test]
    fn optional_fields_appear_when_set() {
        let mut spec = spec();
        spec.user = Some("webuser".to_string());
        spec.docker_exec_args = vec!["-it".to_string()];
        let value = serde_json::to_value(Decision::Allowed { spec }).unwrap();
        assert_eq!(value["user"], "webuser");
        assert_eq!(value["docker-exec-args"], serde_json::json!(["-it"]));
        assert!(value.get("entrypoint").is_none());
    }

    #[test]
    fn messages_are_distinct() {
        let reasons = [
            DenyReason::MissingAccount,
            DenyReason::InvalidAccount,
            DenyReason::NoKeyProvided,
            DenyReason::ValidationServiceError,
            DenyReason::AccessDenied,
            DenyReason::InventoryResolutionError,
            DenyReason::SessionPolicyError,
            DenyReason::Misconfigured,
        ];
        let unique: std::collections::HashSet<_> = reasons.iter().map(|r| r.message()).collect();
        assert_eq!(unique.len(), reasons.len());
    }

    #[test]
    fn is_allowed() {
        assert!(Decision::Allowed { spec: spec() }.is_allowed());
        assert!(!Decision::denied(DenyReason::AccessDenied).is_allowed());
    }
}
