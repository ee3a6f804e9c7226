use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::{debug, info};

use super::{
    to_minor_units, PayoutHandle, PayoutRequest, ProcessorGateway, TransferHandle, TransferRequest,
};
use crate::error::ProcessorError;

/// Every gateway call gets a bounded timeout; a hung request surfaces as
/// `ProcessorError::Timeout` and goes through the idempotency lookup before
/// any retry.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Card-processor gateway over the Stripe HTTP API.
///
/// Form-encoded requests, bearer auth, `Idempotency-Key` header on every
/// mutating call. Transfers are tagged with a `transfer_group` carrying the
/// execution id so they can be found again after an ambiguous timeout.
pub struct StripeGateway {
    client: Client,
    api_base: String,
    secret_key: String,
}

impl StripeGateway {
    pub fn new(api_base: String, secret_key: String) -> Self {
        Self {
            client: Client::new(),
            api_base: api_base.trim_end_matches('/').to_string(),
            secret_key,
        }
    }

    fn classify_error(status: StatusCode, body: &str) -> ProcessorError {
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return ProcessorError::AuthenticationFailed;
        }
        if status == StatusCode::TOO_MANY_REQUESTS {
            return ProcessorError::RateLimited;
        }
        if status.is_server_error() {
            return ProcessorError::ServiceUnavailable(status.to_string());
        }

        let parsed: Result<ErrorEnvelope, _> = serde_json::from_str(body);
        let (code, message) = match parsed {
            Ok(envelope) => (
                envelope.error.code.unwrap_or_default(),
                envelope.error.message.unwrap_or_default(),
            ),
            Err(_) => (String::new(), body.to_string()),
        };

        match code.as_str() {
            "balance_insufficient" | "insufficient_funds" => ProcessorError::InsufficientFunds,
            "account_invalid" | "account_deactivated" | "bank_account_unusable"
            | "no_external_account" => ProcessorError::InvalidDestination(message),
            "transfers_not_allowed" | "payouts_not_allowed" => ProcessorError::TransfersDisabled,
            "rate_limit" => ProcessorError::RateLimited,
            "" => ProcessorError::Api {
                code: format!("http_{}", status.as_u16()),
                message,
            },
            _ => ProcessorError::Api { code, message },
        }
    }

    async fn error_from_response(response: reqwest::Response) -> ProcessorError {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        Self::classify_error(status, &body)
    }
}

#[async_trait]
impl ProcessorGateway for StripeGateway {
    async fn available_balance(&self, currency: &str) -> Result<Decimal, ProcessorError> {
        let response = self
            .client
            .get(format!("{}/v1/balance", self.api_base))
            .bearer_auth(&self.secret_key)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::error_from_response(response).await);
        }

        let balance: BalanceResponse = response.json().await?;
        let minor: i64 = balance
            .available
            .iter()
            .filter(|entry| entry.currency == currency)
            .map(|entry| entry.amount)
            .sum();

        let available = Decimal::new(minor, 2);
        debug!("Processor available balance: {} {}", available, currency);
        Ok(available)
    }

    async fn create_transfer(
        &self,
        request: &TransferRequest,
    ) -> Result<TransferHandle, ProcessorError> {
        let minor = to_minor_units(request.amount)?;

        let mut params = vec![
            ("amount", minor.to_string()),
            ("currency", request.currency.clone()),
            ("destination", request.destination.clone()),
            ("transfer_group", request.transfer_group.clone()),
        ];
        if let Some(description) = &request.description {
            params.push(("description", description.clone()));
        }

        let response = self
            .client
            .post(format!("{}/v1/transfers", self.api_base))
            .bearer_auth(&self.secret_key)
            .header("Idempotency-Key", &request.idempotency_key)
            .timeout(REQUEST_TIMEOUT)
            .form(&params)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::error_from_response(response).await);
        }

        let transfer: TransferObject = response.json().await?;
        info!(
            "✓ Processor transfer created: {} ({} {})",
            transfer.id, request.amount, request.currency
        );
        Ok(transfer.into_handle())
    }

    async fn create_payout(
        &self,
        request: &PayoutRequest,
    ) -> Result<PayoutHandle, ProcessorError> {
        let minor = to_minor_units(request.amount)?;

        let mut params = vec![
            ("amount", minor.to_string()),
            ("currency", request.currency.clone()),
        ];
        if let Some(descriptor) = &request.statement_descriptor {
            params.push(("statement_descriptor", descriptor.clone()));
        }

        let response = self
            .client
            .post(format!("{}/v1/payouts", self.api_base))
            .bearer_auth(&self.secret_key)
            .header("Idempotency-Key", &request.idempotency_key)
            .timeout(REQUEST_TIMEOUT)
            .form(&params)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::error_from_response(response).await);
        }

        let payout: PayoutObject = response.json().await?;
        info!(
            "✓ Processor payout created: {} ({} {})",
            payout.id, request.amount, request.currency
        );
        Ok(PayoutHandle {
            id: payout.id,
            amount: Decimal::new(payout.amount, 2),
            currency: payout.currency,
        })
    }

    async fn find_transfer(
        &self,
        transfer_group: &str,
    ) -> Result<Option<TransferHandle>, ProcessorError> {
        let response = self
            .client
            .get(format!("{}/v1/transfers", self.api_base))
            .bearer_auth(&self.secret_key)
            .query(&[("transfer_group", transfer_group), ("limit", "1")])
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::error_from_response(response).await);
        }

        let list: TransferList = response.json().await?;
        Ok(list.data.into_iter().next().map(TransferObject::into_handle))
    }
}

// ========== WIRE TYPES ==========

#[derive(Debug, Deserialize)]
struct BalanceResponse {
    available: Vec<BalanceEntry>,
}

#[derive(Debug, Deserialize)]
struct BalanceEntry {
    amount: i64,
    currency: String,
}

#[derive(Debug, Deserialize)]
struct TransferObject {
    id: String,
    amount: i64,
    currency: String,
}

impl TransferObject {
    fn into_handle(self) -> TransferHandle {
        TransferHandle {
            id: self.id,
            amount: Decimal::new(self.amount, 2),
            currency: self.currency,
        }
    }
}

#[derive(Debug, Deserialize)]
struct PayoutObject {
    id: String,
    amount: i64,
    currency: String,
}

#[derive(Debug, Deserialize)]
struct TransferList {
    data: Vec<TransferObject>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ApiErrorBody,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    code: Option<String>,
    message: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn parses_balance_response() {
        let body = r#"{
            "available": [
                {"amount": 123456, "currency": "usd"},
                {"amount": 999, "currency": "eur"}
            ],
            "pending": []
        }"#;
        let parsed: BalanceResponse = serde_json::from_str(body).unwrap();
        let usd: i64 = parsed
            .available
            .iter()
            .filter(|e| e.currency == "usd")
            .map(|e| e.amount)
            .sum();
        assert_eq!(Decimal::new(usd, 2), dec!(1234.56));
    }

    #[test]
    fn classifies_insufficient_funds() {
        let body = r#"{"error": {"code": "balance_insufficient", "message": "Your balance is too low"}}"#;
        let err = StripeGateway::classify_error(StatusCode::BAD_REQUEST, body);
        assert!(matches!(err, ProcessorError::InsufficientFunds));
    }

    #[test]
    fn classifies_bad_destination() {
        let body = r#"{"error": {"code": "account_invalid", "message": "No such destination"}}"#;
        let err = StripeGateway::classify_error(StatusCode::BAD_REQUEST, body);
        assert!(matches!(err, ProcessorError::InvalidDestination(_)));
    }

    #[test]
    fn classifies_auth_and_rate_limit_by_status() {
        assert!(matches!(
            StripeGateway::classify_error(StatusCode::UNAUTHORIZED, "{}"),
            ProcessorError::AuthenticationFailed
        ));
        assert!(matches!(
            StripeGateway::classify_error(StatusCode::TOO_MANY_REQUESTS, "{}"),
            ProcessorError::RateLimited
        ));
        assert!(matches!(
            StripeGateway::classify_error(StatusCode::BAD_GATEWAY, "oops"),
            ProcessorError::ServiceUnavailable(_)
        ));
    }

    #[test]
    fn unknown_codes_are_preserved() {
        let body = r#"{"error": {"code": "weird_new_code", "message": "who knows"}}"#;
        match StripeGateway::classify_error(StatusCode::BAD_REQUEST, body) {
            ProcessorError::Api { code, .. } => assert_eq!(code, "weird_new_code"),
            other => panic!("unexpected: {:?}", other),
        }
    }
}
