use std::sync::Arc;

use tracing::{debug, error, info, instrument, warn};

use crate::backend::{KeyValidator, ServerInventory, ServiceError};
use crate::session::{validate_path_segment, SessionPolicy};

use super::decision::{Decision, DenyReason};
use super::fingerprint::key_fingerprint;

/// Decides, once per SSH connection attempt, whether an account may connect
/// and with which container session.
///
/// Every failure path fails closed: the result is always a [`Decision`],
/// never an error, and each external call is attempted at most once.
pub struct AuthorizationHook {
    validator: Arc<dyn KeyValidator>,
    inventory: Arc<dyn ServerInventory>,
    policy: Arc<dyn SessionPolicy>,
}

impl AuthorizationHook {
    pub fn new(
        validator: Arc<dyn KeyValidator>,
        inventory: Arc<dyn ServerInventory>,
        policy: Arc<dyn SessionPolicy>,
    ) -> Self {
        Self {
            validator,
            inventory,
            policy,
        }
    }

    /// Authorize `account` against the presented `keys`.
    ///
    /// 1. No keys: deny without contacting anything.
    /// 2. Query the validator for each key in order; the first valid key
    ///    wins and later keys are never sent.  A service failure denies
    ///    immediately.
    /// 3. Resolve the account's server.
    /// 4. Derive the session through the policy.
    #[instrument(skip(self, keys), fields(key_count = keys.len()))]
    pub async fn authorize(&self, account: &str, keys: &[String]) -> Decision {
        if keys.is_empty() {
            info!("no ssh key presented");
            return Decision::denied(DenyReason::NoKeyProvided);
        }
        if account.is_empty() {
            warn!("no account identifier supplied");
            return Decision::denied(DenyReason::MissingAccount);
        }
        if let Err(e) = validate_path_segment(account, "account") {
            warn!(error = %e, "refusing account identifier");
            return Decision::denied(DenyReason::InvalidAccount);
        }

        match self.first_valid_key(account, keys).await {
            Ok(Some(fingerprint)) => info!(%fingerprint, "account verified"),
            Ok(None) => {
                info!("no presented key is valid for account");
                return Decision::denied(DenyReason::AccessDenied);
            }
            Err(e) => {
                error!(error = %e, "key validation service failed");
                return Decision::denied(DenyReason::ValidationServiceError);
            }
        }

        let server = match self.inventory.resolve_server(account).await {
            Ok(server) => server,
            Err(e) => {
                error!(error = %e, "failed to resolve account server");
                return Decision::denied(DenyReason::InventoryResolutionError);
            }
        };
        debug!(
            architecture = %server.architecture,
            hostname = %server.hostname,
            server_id = %server.id,
            server_name = %server.name,
            "resolved account server"
        );

        match self.policy.build(account, &server) {
            Ok(spec) if spec.command.is_empty() => {
                error!("session policy produced an empty command");
                Decision::denied(DenyReason::SessionPolicyError)
            }
            Ok(spec) => {
                info!(image = %spec.image_name, "access granted");
                Decision::Allowed { spec }
            }
            Err(e) => {
                error!(error = %e, "failed to derive session");
                Decision::denied(DenyReason::SessionPolicyError)
            }
        }
    }

    /// Scan `keys` in order and return the fingerprint of the first one the
    /// validator accepts.
    async fn first_valid_key(
        &self,
        account: &str,
        keys: &[String],
    ) -> Result<Option<String>, ServiceError> {
        for key in keys {
            let fingerprint = key_fingerprint(key);
            if self.validator.is_valid_key(account, key).await? {
                return Ok(Some(fingerprint));
            }
            debug!(%fingerprint, "key rejected");
        }
        Ok(None)
    }
}
