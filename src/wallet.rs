//! Upstream wallet/agent API for externally custodied balances.

use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;

use crate::ledger::TableId;

const LOG_TARGET: &str = "wallet";

pub const ERROR_OK: i32 = 0;
/// Business rejections the operator will never accept on retry.
pub const ERROR_INSUFFICIENT_BALANCE: i32 = 1001;
pub const ERROR_ACCOUNT_BLOCKED: i32 = 1002;
pub const ERROR_ACCOUNT_NOT_FOUND: i32 = 1003;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletRequest {
    pub username: String,
    pub currency: String,
    pub amount: Decimal,
    /// Idempotency token, fresh per call.
    pub txd: String,
    pub game_id: String,
    pub table_id: TableId,
    #[serde(default)]
    pub bet_infos: Value,
    #[serde(default)]
    pub game_infos: Value,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletResponse {
    pub error_code: i32,
    /// Balance after the call.
    #[serde(default)]
    pub amount: Decimal,
}

#[derive(Debug, thiserror::Error)]
pub enum WalletApiError {
    #[error("wallet rejected the request with code {code}")]
    Rejected { code: i32 },
    #[error("wallet upstream error code {code}")]
    Upstream { code: i32 },
    #[error("wallet transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("wallet returned HTTP {0}")]
    Status(reqwest::StatusCode),
    #[error("invalid wallet url: {0}")]
    Url(#[from] url::ParseError),
}

impl WalletApiError {
    /// Business rejections are final; everything else may succeed later.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, WalletApiError::Rejected { .. } | WalletApiError::Url(_))
    }

    fn from_code(code: i32) -> Self {
        match code {
            ERROR_INSUFFICIENT_BALANCE | ERROR_ACCOUNT_BLOCKED | ERROR_ACCOUNT_NOT_FOUND => {
                WalletApiError::Rejected { code }
            }
            _ => WalletApiError::Upstream { code },
        }
    }
}

/// Interpret a response body: zero is success, anything else an error.
pub fn check_response(response: WalletResponse) -> Result<WalletResponse, WalletApiError> {
    if response.error_code == ERROR_OK {
        Ok(response)
    } else {
        Err(WalletApiError::from_code(response.error_code))
    }
}

#[async_trait]
pub trait WalletApi: Send + Sync {
    async fn get_user_balance(
        &self,
        username: &str,
        currency: &str,
    ) -> Result<Decimal, WalletApiError>;

    async fn settle(&self, request: &WalletRequest) -> Result<WalletResponse, WalletApiError>;

    async fn re_settle(&self, request: &WalletRequest) -> Result<WalletResponse, WalletApiError>;

    async fn cancel_round(&self, request: &WalletRequest)
        -> Result<WalletResponse, WalletApiError>;
}

pub struct ReqwestWalletApi {
    client: reqwest::Client,
    base_url: Url,
}

impl ReqwestWalletApi {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, WalletApiError> {
        let mut base_url = Url::parse(base_url)?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, base_url })
    }

    async fn post(
        &self,
        path: &str,
        request: &WalletRequest,
    ) -> Result<WalletResponse, WalletApiError> {
        let url = self.base_url.join(path)?;
        let response = self.client.post(url).json(request).send().await?;
        if !response.status().is_success() {
            tracing::warn!(
                target: LOG_TARGET,
                path,
                status = %response.status(),
                txd = %request.txd,
                "wallet call failed"
            );
            return Err(WalletApiError::Status(response.status()));
        }
        let body: WalletResponse = response.json().await?;
        check_response(body)
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct BalanceQuery<'a> {
    username: &'a str,
    currency: &'a str,
}

#[async_trait]
impl WalletApi for ReqwestWalletApi {
    async fn get_user_balance(
        &self,
        username: &str,
        currency: &str,
    ) -> Result<Decimal, WalletApiError> {
        let url = self.base_url.join("getUserBalance")?;
        let response = self
            .client
            .post(url)
            .json(&BalanceQuery { username, currency })
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(WalletApiError::Status(response.status()));
        }
        let body: WalletResponse = response.json().await?;
        Ok(check_response(body)?.amount)
    }

    async fn settle(&self, request: &WalletRequest) -> Result<WalletResponse, WalletApiError> {
        self.post("settle", request).await
    }

    async fn re_settle(&self, request: &WalletRequest) -> Result<WalletResponse, WalletApiError> {
        self.post("reSettle", request).await
    }

    async fn cancel_round(
        &self,
        request: &WalletRequest,
    ) -> Result<WalletResponse, WalletApiError> {
        self.post("cancelRound", request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    #[test]
    fn request_uses_camel_case_wire_names() {
        let request = WalletRequest {
            username: "alice".into(),
            currency: "USD".into(),
            amount: dec!(19.5),
            txd: "t-1".into(),
            game_id: "B01-20240101-001".into(),
            table_id: 4,
            bet_infos: json!([]),
            game_infos: json!({}),
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["gameId"], "B01-20240101-001");
        assert_eq!(value["tableId"], 4);
        assert!(value.get("betInfos").is_some());
    }

    #[test]
    fn business_rejections_are_not_retryable() {
        let body = |code| WalletResponse {
            error_code: code,
            amount: Decimal::ZERO,
        };
        assert!(check_response(body(ERROR_OK)).is_ok());

        let err = check_response(body(ERROR_INSUFFICIENT_BALANCE)).unwrap_err();
        assert!(!err.is_retryable());
        let err = check_response(body(ERROR_ACCOUNT_BLOCKED)).unwrap_err();
        assert!(!err.is_retryable());

        let err = check_response(body(9999)).unwrap_err();
        assert!(err.is_retryable());
    }

    #[test]
    fn response_parses_error_code_and_balance() {
        let body: WalletResponse =
            serde_json::from_value(json!({"errorCode": 0, "amount": "120.50"})).unwrap();
        assert_eq!(body.amount, dec!(120.50));
    }
}
