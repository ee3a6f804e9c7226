// Processor gateway - the narrow typed surface over the external card
// processor. The engine only ever sees this trait plus the ProcessorError
// taxonomy; everything provider-specific lives in the gateway impl.

pub mod stripe;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::ProcessorError;

pub use stripe::StripeGateway;

/// A transfer to a named destination account.
///
/// `idempotency_key` must stay constant across retries of the same attempt
/// so a duplicated network send cannot create two transfers.
/// `transfer_group` carries the execution id and is what `find_transfer`
/// looks up after an ambiguous timeout.
#[derive(Debug, Clone)]
pub struct TransferRequest {
    pub amount: Decimal,
    pub currency: String,
    pub destination: String,
    pub idempotency_key: String,
    pub transfer_group: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferHandle {
    pub id: String,
    pub amount: Decimal,
    pub currency: String,
}

/// A payout from the processor's settlement balance to the external bank
/// destination configured on the account.
#[derive(Debug, Clone)]
pub struct PayoutRequest {
    pub amount: Decimal,
    pub currency: String,
    pub idempotency_key: String,
    pub statement_descriptor: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PayoutHandle {
    pub id: String,
    pub amount: Decimal,
    pub currency: String,
}

#[async_trait]
pub trait ProcessorGateway: Send + Sync {
    /// Funds currently available in the settlement currency. Read-only.
    async fn available_balance(&self, currency: &str) -> Result<Decimal, ProcessorError>;

    async fn create_transfer(&self, request: &TransferRequest)
        -> Result<TransferHandle, ProcessorError>;

    async fn create_payout(&self, request: &PayoutRequest)
        -> Result<PayoutHandle, ProcessorError>;

    /// Look up a previously created transfer by its transfer group. Used to
    /// disambiguate a timed-out `create_transfer` before retrying it.
    async fn find_transfer(
        &self,
        transfer_group: &str,
    ) -> Result<Option<TransferHandle>, ProcessorError>;
}

/// Convert a decimal major-unit amount to the processor's integer minor
/// units (cents). Settlement amounts are 2dp; anything finer is a bug
/// upstream and gets rejected rather than silently rounded.
pub fn to_minor_units(amount: Decimal) -> Result<i64, ProcessorError> {
    use rust_decimal::prelude::ToPrimitive;

    let minor = amount * Decimal::ONE_HUNDRED;
    if minor.fract() != Decimal::ZERO {
        return Err(ProcessorError::InvalidAmount(format!(
            "{} has sub-cent precision",
            amount
        )));
    }
    minor
        .to_i64()
        .ok_or_else(|| ProcessorError::InvalidAmount(format!("{} out of range", amount)))
}
