use std::sync::Arc;

use serde_json::{json, Value};
use tickwork_core::TenantId;
use tickwork_store::{Store, TxAction};
use tracing::debug;

use crate::error::{Result, SchedulerError};
use crate::paths;

/// Per-tenant credit balance stored at `tenants/{tenant}/credits`.
///
/// Every mutation goes through a store transaction, so concurrent
/// deductions for the same tenant can neither lose updates nor drive the
/// balance below zero.
#[derive(Clone)]
pub struct CreditLedger {
    store: Arc<dyn Store>,
}

impl CreditLedger {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub async fn balance(&self, tenant: &TenantId) -> Result<u64> {
        let value = self.store.get(&paths::credits(tenant)).await?;
        Ok(value.as_ref().and_then(Value::as_u64).unwrap_or(0))
    }

    /// Atomically deduct `cost`, returning the remaining balance.
    pub async fn check_and_deduct(&self, tenant: &TenantId, cost: u64) -> Result<u64> {
        let mut observed = 0u64;
        let outcome = self
            .store
            .transaction(&paths::credits(tenant), &mut |current| {
                let balance = current.and_then(Value::as_u64).unwrap_or(0);
                observed = balance;
                if balance < cost {
                    TxAction::Abort
                } else {
                    TxAction::Commit(json!(balance - cost))
                }
            })
            .await?;

        if !outcome.committed {
            return Err(SchedulerError::InsufficientCredit {
                balance: observed,
                required: cost,
            });
        }
        let remaining = observed - cost;
        debug!(tenant = %tenant, cost, remaining, "credits deducted");
        Ok(remaining)
    }

    /// Atomically add credits (purchases, refunds), returning the new balance.
    pub async fn grant(&self, tenant: &TenantId, amount: u64) -> Result<u64> {
        let outcome = self
            .store
            .transaction(&paths::credits(tenant), &mut |current| {
                let balance = current.and_then(Value::as_u64).unwrap_or(0);
                TxAction::Commit(json!(balance.saturating_add(amount)))
            })
            .await?;
        Ok(outcome.value.as_ref().and_then(Value::as_u64).unwrap_or(0))
    }

    /// Non-atomic pre-check used by the request path before doing any work.
    pub async fn ensure_available(&self, tenant: &TenantId, cost: u64) -> Result<()> {
        let balance = self.balance(tenant).await?;
        if balance < cost {
            return Err(SchedulerError::InsufficientCredit {
                balance,
                required: cost,
            });
        }
        Ok(())
    }
}
