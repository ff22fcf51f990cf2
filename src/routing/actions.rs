//! Action executor seam and approval tokens.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Proof of human confirmation for a destructive action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalToken {
    pub group_id: String,
    pub granted_by: String,
    pub granted_at: chrono::DateTime<chrono::Utc>,
}

/// A requested response action against one target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionRequest {
    pub action_type: String,
    pub target: String,
    pub tenant_id: String,
    pub group_id: String,
    /// Destructive actions are never executed without an approval token
    pub destructive: bool,
}

/// Result of submitting an action request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionResult {
    /// Action executed
    Executed { action: String, message: String },
    /// Action was not executed (dry run)
    DryRun { action: String, would_do: String },
    /// Action refused
    Rejected { action: String, reason: String },
}

impl ActionResult {
    pub fn is_executed(&self) -> bool {
        matches!(self, ActionResult::Executed { .. })
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self, ActionResult::Rejected { .. })
    }
}

/// External action executor. Implementations must reject destructive
/// requests that arrive without an approval token; the router enforces the
/// same rule on its side, so a missing token is stopped twice.
#[async_trait]
pub trait ActionExecutor: Send + Sync {
    async fn request_action(
        &self,
        request: &ActionRequest,
        approval: Option<&ApprovalToken>,
    ) -> ActionResult;
}

/// Default executor: logs what would happen and enforces the token rule.
/// Stands in for the real responder in development and tests.
pub struct LoggingExecutor {
    dry_run: bool,
}

impl LoggingExecutor {
    pub fn new(dry_run: bool) -> Self {
        Self { dry_run }
    }
}

#[async_trait]
impl ActionExecutor for LoggingExecutor {
    async fn request_action(
        &self,
        request: &ActionRequest,
        approval: Option<&ApprovalToken>,
    ) -> ActionResult {
        if request.destructive && approval.is_none() {
            warn!(
                action = %request.action_type,
                target = %request.target,
                "Destructive action rejected: no approval token"
            );
            return ActionResult::Rejected {
                action: request.action_type.clone(),
                reason: "destructive action requires approval token".to_string(),
            };
        }

        if self.dry_run {
            return ActionResult::DryRun {
                action: request.action_type.clone(),
                would_do: format!("{} on {}", request.action_type, request.target),
            };
        }

        info!(
            action = %request.action_type,
            target = %request.target,
            tenant = %request.tenant_id,
            approved_by = approval.map(|a| a.granted_by.as_str()).unwrap_or("-"),
            "Action executed"
        );
        ActionResult::Executed {
            action: request.action_type.clone(),
            message: format!("{} on {}", request.action_type, request.target),
        }
    }
}
