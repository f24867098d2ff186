//! User and device registration with crash-safe retry bookkeeping.

use std::sync::Arc;

use relay_core::DeliveryError;
use relay_platform::{KeyValueStorage, RecordStorage, StorageError, StorageScope};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::network::{ApiRequest, NetworkClient, send_expecting_success};

const SCOPE: StorageScope = StorageScope::Shared;

/// Key under which the current user id is stored.
pub const USER_ID_KEY: &str = "user.id";
/// Key under which the current opt status is stored.
pub const OPT_STATUS_KEY: &str = "opt.status";
/// Key under which the current device token is stored.
pub const DEVICE_TOKEN_KEY: &str = "device.token";
/// Key holding aliases whose registration has not yet succeeded.
pub const FAILED_ALIASES_KEY: &str = "registration.failed-aliases";

/// One registration call against the tenant backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistrationOperation {
    /// Bind the device to a customer id.
    SetUser { user_id: String },
    /// Attach additional aliases to the current user.
    AddUserAlias { aliases: Vec<String> },
    /// Record the user's push opt decision.
    SetOptStatus { opted_in: bool },
    /// Replace the device push token.
    SetDeviceToken { token: String },
}

impl RegistrationOperation {
    fn kind(&self) -> OperationKind {
        match self {
            Self::SetUser { .. } => OperationKind::SetUser,
            Self::AddUserAlias { .. } => OperationKind::AddUserAlias,
            Self::SetOptStatus { .. } => OperationKind::Opt,
            Self::SetDeviceToken { .. } => OperationKind::DeviceToken,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OperationKind {
    SetUser,
    AddUserAlias,
    Opt,
    DeviceToken,
}

impl OperationKind {
    const ALL: [OperationKind; 4] = [
        OperationKind::SetUser,
        OperationKind::AddUserAlias,
        OperationKind::Opt,
        OperationKind::DeviceToken,
    ];

    fn flag_key(self) -> &'static str {
        match self {
            Self::SetUser => "registration.set-user",
            Self::AddUserAlias => "registration.add-alias",
            Self::Opt => "registration.opt",
            Self::DeviceToken => "registration.device-token",
        }
    }

    fn backup_name(self, tenant_id: u32) -> String {
        let stem = match self {
            Self::SetUser => "set-user",
            Self::AddUserAlias => "add-alias",
            Self::Opt => "opt",
            Self::DeviceToken => "device-token",
        };
        format!("backup-{stem}-{tenant_id}.json")
    }
}

/// Request snapshot written before the wire call so a crash mid-send can
/// be replayed on the next launch.
#[derive(Debug, Serialize, Deserialize)]
struct BackupRecord {
    path: String,
    body: Value,
}

/// Sends registration calls and tracks their outcome across launches.
///
/// Every call follows the same discipline: persist a backup of the exact
/// request, send it, then either mark the call succeeded and drop the
/// backup, or mark it failed and keep the backup for
/// [`Registrar::retry_failed_operations_if_exist`]. Alias registrations
/// additionally accumulate the aliases that have not reached the backend
/// yet and resend them alongside the next attempt.
pub struct Registrar {
    network: Arc<dyn NetworkClient>,
    values: Arc<dyn KeyValueStorage>,
    records: Arc<dyn RecordStorage>,
    tenant_id: u32,
}

impl Registrar {
    pub fn new(
        network: Arc<dyn NetworkClient>,
        values: Arc<dyn KeyValueStorage>,
        records: Arc<dyn RecordStorage>,
        tenant_id: u32,
    ) -> Self {
        Self {
            network,
            values,
            records,
            tenant_id,
        }
    }

    /// Execute one registration call with backup-before-send semantics.
    pub async fn handle(&self, operation: RegistrationOperation) -> Result<(), DeliveryError> {
        let kind = operation.kind();
        let request = self.build_request(&operation);

        self.remember_operation_inputs(&operation);
        self.write_backup(kind, &request);

        match send_expecting_success(self.network.as_ref(), request).await {
            Ok(_) => {
                self.record_outcome(kind, true);
                if kind == OperationKind::AddUserAlias {
                    self.clear_failed_aliases();
                }
                Ok(())
            }
            Err(err) => {
                self.record_outcome(kind, false);
                if let RegistrationOperation::AddUserAlias { aliases } = &operation {
                    self.remember_failed_aliases(aliases);
                }
                Err(DeliveryError::Registration(err.to_string()))
            }
        }
    }

    /// Replay every registration call whose last attempt failed.
    ///
    /// Called once per launch before the pipeline starts accepting
    /// operations. Replays that fail again keep their flag and backup for
    /// the launch after.
    pub async fn retry_failed_operations_if_exist(&self) {
        for kind in OperationKind::ALL {
            if self.flag(kind) != Some(false) {
                continue;
            }
            let backup = match self.load_backup(kind) {
                Some(backup) => backup,
                None => {
                    tracing::warn!(flag = kind.flag_key(), "failed registration has no backup to replay");
                    continue;
                }
            };

            let request = ApiRequest::new(backup.path, backup.body);
            match send_expecting_success(self.network.as_ref(), request).await {
                Ok(_) => {
                    tracing::info!(flag = kind.flag_key(), "replayed failed registration");
                    self.record_outcome(kind, true);
                    if kind == OperationKind::AddUserAlias {
                        self.clear_failed_aliases();
                    }
                }
                Err(err) => {
                    tracing::warn!(flag = kind.flag_key(), error = %err, "registration replay failed");
                }
            }
        }
    }

    /// Re-register the stored user, used after an identity-format change.
    pub async fn migrate_current_user(&self) -> Result<(), DeliveryError> {
        let Some(user_id) = self.stored_value(USER_ID_KEY) else {
            return Ok(());
        };
        self.handle(RegistrationOperation::SetUser { user_id }).await
    }

    fn build_request(&self, operation: &RegistrationOperation) -> ApiRequest {
        let tenant = self.tenant_id;
        match operation {
            RegistrationOperation::SetUser { user_id } => ApiRequest::new(
                format!("/tenants/{tenant}/users"),
                json!({ "user_id": user_id }),
            ),
            RegistrationOperation::AddUserAlias { aliases } => {
                let mut all = self.failed_aliases();
                for alias in aliases {
                    if !all.contains(alias) {
                        all.push(alias.clone());
                    }
                }
                ApiRequest::new(
                    format!("/tenants/{tenant}/users/aliases"),
                    json!({
                        "user_id": self.stored_value(USER_ID_KEY),
                        "aliases": all,
                    }),
                )
            }
            RegistrationOperation::SetOptStatus { opted_in } => ApiRequest::new(
                format!("/tenants/{tenant}/users/opt"),
                json!({ "opted_in": opted_in }),
            ),
            RegistrationOperation::SetDeviceToken { token } => ApiRequest::new(
                format!("/tenants/{tenant}/devices"),
                json!({ "token": token }),
            ),
        }
    }

    fn remember_operation_inputs(&self, operation: &RegistrationOperation) {
        let (key, value) = match operation {
            RegistrationOperation::SetUser { user_id } => (USER_ID_KEY, user_id.clone()),
            RegistrationOperation::SetOptStatus { opted_in } => (
                OPT_STATUS_KEY,
                if *opted_in { "in" } else { "out" }.to_owned(),
            ),
            RegistrationOperation::SetDeviceToken { token } => (DEVICE_TOKEN_KEY, token.clone()),
            RegistrationOperation::AddUserAlias { .. } => return,
        };
        if let Err(err) = self.values.set_value(SCOPE, key, &value) {
            tracing::warn!(key, error = %err, "could not persist registration input");
        }
    }

    fn write_backup(&self, kind: OperationKind, request: &ApiRequest) {
        let name = kind.backup_name(self.tenant_id);
        if let Err(err) = self.try_write_backup(&name, request) {
            tracing::warn!(record = %name, error = %err, "could not persist registration backup");
        }
    }

    fn try_write_backup(&self, name: &str, request: &ApiRequest) -> Result<(), DeliveryError> {
        let backup = BackupRecord {
            path: request.path.clone(),
            body: request.body.clone(),
        };
        let raw = serde_json::to_string(&backup)
            .map_err(|err| DeliveryError::Persistence(err.to_string()))?;
        self.records
            .save_record(SCOPE, name, &raw)
            .map_err(|err| DeliveryError::Persistence(err.to_string()))
    }

    fn load_backup(&self, kind: OperationKind) -> Option<BackupRecord> {
        let name = kind.backup_name(self.tenant_id);
        match self.records.load_record(SCOPE, &name) {
            Ok(raw) => match serde_json::from_str(&raw) {
                Ok(backup) => Some(backup),
                Err(err) => {
                    tracing::warn!(record = %name, error = %err, "discarding unreadable registration backup");
                    None
                }
            },
            Err(StorageError::NotFound) => None,
            Err(err) => {
                tracing::warn!(record = %name, error = %err, "could not load registration backup");
                None
            }
        }
    }

    fn record_outcome(&self, kind: OperationKind, success: bool) {
        let flag = if success { "true" } else { "false" };
        if let Err(err) = self.values.set_value(SCOPE, kind.flag_key(), flag) {
            tracing::warn!(flag = kind.flag_key(), error = %err, "could not persist registration flag");
        }
        if success {
            let name = kind.backup_name(self.tenant_id);
            match self.records.delete_record(SCOPE, &name) {
                Ok(()) | Err(StorageError::NotFound) => {}
                Err(err) => {
                    tracing::warn!(record = %name, error = %err, "could not delete registration backup");
                }
            }
        }
    }

    fn flag(&self, kind: OperationKind) -> Option<bool> {
        self.stored_value(kind.flag_key())
            .map(|value| value == "true")
    }

    fn failed_aliases(&self) -> Vec<String> {
        let Some(raw) = self.stored_value(FAILED_ALIASES_KEY) else {
            return Vec::new();
        };
        serde_json::from_str(&raw).unwrap_or_default()
    }

    fn remember_failed_aliases(&self, aliases: &[String]) {
        let mut all = self.failed_aliases();
        for alias in aliases {
            if !all.contains(alias) {
                all.push(alias.clone());
            }
        }
        let raw = match serde_json::to_string(&all) {
            Ok(raw) => raw,
            Err(err) => {
                tracing::warn!(error = %err, "could not encode failed aliases");
                return;
            }
        };
        if let Err(err) = self.values.set_value(SCOPE, FAILED_ALIASES_KEY, &raw) {
            tracing::warn!(error = %err, "could not persist failed aliases");
        }
    }

    fn clear_failed_aliases(&self) {
        match self.values.remove_value(SCOPE, FAILED_ALIASES_KEY) {
            Ok(()) | Err(StorageError::NotFound) => {}
            Err(err) => {
                tracing::warn!(error = %err, "could not clear failed aliases");
            }
        }
    }

    fn stored_value(&self, key: &str) -> Option<String> {
        match self.values.get_value(SCOPE, key) {
            Ok(value) => Some(value),
            Err(StorageError::NotFound) => None,
            Err(err) => {
                tracing::warn!(key, error = %err, "could not read stored value");
                None
            }
        }
    }
}
