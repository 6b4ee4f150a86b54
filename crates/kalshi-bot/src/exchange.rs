//! REST client for the exchange's trade API.
//!
//! Requests are authenticated with an RSA-PSS signature over
//! `timestamp + method + path`, carried in the `KALSHI-ACCESS-*` headers.
//! All fetches go through a bounded retry with exponential backoff; a
//! request that keeps failing surfaces a typed error to the caller instead
//! of hanging the engine.

use std::path::Path;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Utc};
use rand::Rng;
use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::pkcs8::DecodePrivateKey;
use rsa::pss::Pss;
use rsa::RsaPrivateKey;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::warn;
use uuid::Uuid;

use kalshi_common::{Cents, Side};

/// Errors from the exchange client.
#[derive(Debug, Error)]
pub enum ExchangeError {
    #[error("failed to load private key: {0}")]
    Key(String),

    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("exchange returned {status}: {body}")]
    Api { status: u16, body: String },

    #[error("signing failed: {0}")]
    Signing(String),
}

impl ExchangeError {
    pub fn is_transient(&self) -> bool {
        match self {
            ExchangeError::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            ExchangeError::Timeout(_) => true,
            // 5xx and 429 are worth retrying, 4xx are not.
            ExchangeError::Api { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }
}

/// Exponential backoff with jitter for retries.
///
/// Formula: `min(max_delay, base * 2^attempt) + jitter`.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    max_delay: Duration,
    attempt: u32,
}

impl Backoff {
    pub fn new(base: Duration, max_delay: Duration) -> Self {
        Self {
            base,
            max_delay,
            attempt: 0,
        }
    }

    /// Next delay; increments the attempt counter.
    pub fn next_delay(&mut self) -> Duration {
        let exp = self.base.saturating_mul(2u32.saturating_pow(self.attempt));
        let capped = exp.min(self.max_delay);
        self.attempt = self.attempt.saturating_add(1);
        // 10% jitter keeps a fleet of pollers from thundering together.
        let jitter = capped.as_secs_f64() * 0.1 * rand::thread_rng().gen_range(-1.0..=1.0);
        Duration::from_secs_f64((capped.as_secs_f64() + jitter).max(0.0))
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(Duration::from_millis(500), Duration::from_secs(30))
    }
}

/// Market row as returned by `GET /trade-api/v2/markets`.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiMarket {
    pub ticker: String,
    pub status: String,
    #[serde(default)]
    pub yes_bid: Option<Cents>,
    #[serde(default)]
    pub yes_ask: Option<Cents>,
    #[serde(default)]
    pub no_bid: Option<Cents>,
    #[serde(default)]
    pub no_ask: Option<Cents>,
    #[serde(default)]
    pub last_price: Option<Cents>,
    #[serde(default)]
    pub volume: u64,
}

#[derive(Debug, Deserialize)]
struct MarketsResponse {
    markets: Vec<ApiMarket>,
}

/// Resting order as returned by `GET /trade-api/v2/portfolio/orders`.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiOrder {
    pub order_id: String,
    pub ticker: String,
    pub side: String,
    #[serde(default)]
    pub yes_price: Option<Cents>,
    #[serde(default)]
    pub no_price: Option<Cents>,
    #[serde(default)]
    pub remaining_count: u32,
    pub status: String,
    #[serde(default)]
    pub created_time: Option<DateTime<Utc>>,
}

impl ApiOrder {
    pub fn side(&self) -> Option<Side> {
        match self.side.to_lowercase().as_str() {
            "yes" => Some(Side::Yes),
            "no" => Some(Side::No),
            _ => None,
        }
    }

    pub fn price(&self) -> Option<Cents> {
        match self.side()? {
            Side::Yes => self.yes_price,
            Side::No => self.no_price,
        }
    }

    /// Still resting on the book?
    pub fn is_open(&self) -> bool {
        self.remaining_count > 0
            && matches!(self.status.to_lowercase().as_str(), "resting" | "open" | "pending")
    }
}

#[derive(Debug, Deserialize)]
struct OrdersResponse {
    orders: Vec<ApiOrder>,
}

#[derive(Debug, Deserialize)]
struct BalanceResponse {
    /// Balance in cents.
    balance: i64,
}

#[derive(Debug, Deserialize)]
struct OrderResponse {
    order: ApiOrder,
}

/// Limit-order request body.
#[derive(Debug, Serialize)]
struct CreateOrderBody<'a> {
    action: &'static str,
    ticker: &'a str,
    side: &'static str,
    #[serde(rename = "type")]
    order_type: &'static str,
    count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    yes_price: Option<Cents>,
    #[serde(skip_serializing_if = "Option::is_none")]
    no_price: Option<Cents>,
    client_order_id: String,
}

/// Authenticated REST client.
pub struct ExchangeClient {
    http: reqwest::Client,
    api_url: String,
    key_id: String,
    private_key: RsaPrivateKey,
    max_retries: u32,
}

impl ExchangeClient {
    /// Build a client from a key id and a PEM private key file.
    pub fn new(
        api_url: impl Into<String>,
        key_id: impl Into<String>,
        private_key_path: impl AsRef<Path>,
        timeout: Duration,
        max_retries: u32,
    ) -> Result<Self, ExchangeError> {
        let pem = std::fs::read_to_string(private_key_path.as_ref())
            .map_err(|e| ExchangeError::Key(e.to_string()))?;
        // Keys in the wild come as either PKCS#8 or PKCS#1 PEM.
        let private_key = RsaPrivateKey::from_pkcs8_pem(&pem)
            .or_else(|_| RsaPrivateKey::from_pkcs1_pem(&pem))
            .map_err(|e| ExchangeError::Key(e.to_string()))?;

        let http = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            http,
            api_url: api_url.into(),
            key_id: key_id.into(),
            private_key,
            max_retries,
        })
    }

    /// RSA-PSS signature over `timestamp + method + path` (query stripped).
    fn sign(&self, timestamp_ms: i64, method: &str, path: &str) -> Result<String, ExchangeError> {
        let bare_path = path.split('?').next().unwrap_or(path);
        let message = format!("{}{}{}", timestamp_ms, method, bare_path);
        let digest = Sha256::digest(message.as_bytes());
        let padding = Pss::new_with_salt::<Sha256>(Sha256::output_size());
        let signature = self
            .private_key
            .sign_with_rng(&mut rand::thread_rng(), padding, &digest)
            .map_err(|e| ExchangeError::Signing(e.to_string()))?;
        Ok(BASE64.encode(signature))
    }

    async fn request<T: for<'de> Deserialize<'de>>(
        &self,
        method: reqwest::Method,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> Result<T, ExchangeError> {
        let timestamp_ms = Utc::now().timestamp_millis();
        let signature = self.sign(timestamp_ms, method.as_str(), path)?;

        let mut req = self
            .http
            .request(method, format!("{}{}", self.api_url, path))
            .header("KALSHI-ACCESS-KEY", &self.key_id)
            .header("KALSHI-ACCESS-SIGNATURE", signature)
            .header("KALSHI-ACCESS-TIMESTAMP", timestamp_ms.to_string());
        if let Some(body) = body {
            req = req.json(&body);
        }

        let response = req.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ExchangeError::Api {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response.json::<T>().await?)
    }

    /// Run a request through bounded retry with backoff. Non-transient
    /// errors short-circuit.
    async fn with_retries<T, F, Fut>(&self, mut call: F) -> Result<T, ExchangeError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, ExchangeError>>,
    {
        let mut backoff = Backoff::default();
        let mut attempts = 0;
        loop {
            match call().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempts < self.max_retries => {
                    attempts += 1;
                    let delay = backoff.next_delay();
                    warn!(attempt = attempts, ?delay, error = %e, "transient exchange error, retrying");
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Open markets for a ticker series.
    pub async fn markets(&self, series: &str) -> Result<Vec<ApiMarket>, ExchangeError> {
        let path = format!(
            "/trade-api/v2/markets?series_ticker={}&status=open&limit=200",
            series
        );
        let response: MarketsResponse = self
            .with_retries(|| self.request(reqwest::Method::GET, &path, None))
            .await?;
        Ok(response.markets)
    }

    /// Available balance in dollars.
    pub async fn balance(&self) -> Result<rust_decimal::Decimal, ExchangeError> {
        let response: BalanceResponse = self
            .with_retries(|| {
                self.request(reqwest::Method::GET, "/trade-api/v2/portfolio/balance", None)
            })
            .await?;
        Ok(rust_decimal::Decimal::new(response.balance, 2))
    }

    /// Resting orders.
    pub async fn orders(&self) -> Result<Vec<ApiOrder>, ExchangeError> {
        let response: OrdersResponse = self
            .with_retries(|| {
                self.request(reqwest::Method::GET, "/trade-api/v2/portfolio/orders", None)
            })
            .await?;
        Ok(response.orders)
    }

    /// Place a limit buy. The exchange assigns the order id; the client
    /// order id makes the request idempotent on our side.
    pub async fn create_order(
        &self,
        ticker: &str,
        side: Side,
        price: Cents,
        count: u32,
    ) -> Result<ApiOrder, ExchangeError> {
        let body = CreateOrderBody {
            action: "buy",
            ticker,
            side: match side {
                Side::Yes => "yes",
                Side::No => "no",
            },
            order_type: "limit",
            count,
            yes_price: (side == Side::Yes).then_some(price),
            no_price: (side == Side::No).then_some(price),
            client_order_id: Uuid::new_v4().to_string(),
        };
        let body = serde_json::to_value(&body)
            .map_err(|e| ExchangeError::Signing(e.to_string()))?;
        let response: OrderResponse = self
            .with_retries(|| {
                self.request(
                    reqwest::Method::POST,
                    "/trade-api/v2/portfolio/orders",
                    Some(body.clone()),
                )
            })
            .await?;
        Ok(response.order)
    }

    /// Cancel a resting order.
    pub async fn cancel_order(&self, order_id: &str) -> Result<(), ExchangeError> {
        let path = format!("/trade-api/v2/portfolio/orders/{}", order_id);
        let _: serde_json::Value = self
            .with_retries(|| self.request(reqwest::Method::DELETE, &path, None))
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_grows_and_caps() {
        let mut backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(4));
        let d0 = backoff.next_delay();
        let d1 = backoff.next_delay();
        let d4 = {
            backoff.next_delay();
            backoff.next_delay();
            backoff.next_delay()
        };
        // 10% jitter bounds each delay around its nominal value.
        assert!(d0.as_secs_f64() <= 1.1);
        assert!(d1.as_secs_f64() >= 1.8 && d1.as_secs_f64() <= 2.2);
        assert!(d4.as_secs_f64() <= 4.4);
    }

    #[test]
    fn test_backoff_reset() {
        let mut backoff = Backoff::new(Duration::from_secs(2), Duration::from_secs(60));
        backoff.next_delay();
        backoff.next_delay();
        backoff.reset();
        assert!(backoff.next_delay().as_secs_f64() <= 2.2);
    }

    #[test]
    fn test_api_order_side_and_price() {
        let order = ApiOrder {
            order_id: "O1".to_string(),
            ticker: "KXHIGHNY-26JAN09-B49.5".to_string(),
            side: "no".to_string(),
            yes_price: None,
            no_price: Some(55),
            remaining_count: 10,
            status: "resting".to_string(),
            created_time: None,
        };
        assert_eq!(order.side(), Some(Side::No));
        assert_eq!(order.price(), Some(55));
        assert!(order.is_open());
    }

    #[test]
    fn test_executed_order_not_open() {
        let order = ApiOrder {
            order_id: "O1".to_string(),
            ticker: "T".to_string(),
            side: "yes".to_string(),
            yes_price: Some(40),
            no_price: None,
            remaining_count: 0,
            status: "executed".to_string(),
            created_time: None,
        };
        assert!(!order.is_open());
    }

    #[test]
    fn test_transient_classification() {
        assert!(ExchangeError::Api {
            status: 503,
            body: String::new()
        }
        .is_transient());
        assert!(ExchangeError::Api {
            status: 429,
            body: String::new()
        }
        .is_transient());
        assert!(!ExchangeError::Api {
            status: 400,
            body: String::new()
        }
        .is_transient());
        assert!(!ExchangeError::Key("missing".to_string()).is_transient());
    }
}
