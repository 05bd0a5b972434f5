//! Hosted-checkout payment gateway boundary.
//!
//! The service only ever talks to the gateway through [`PaymentGateway`]. The
//! production implementation speaks the Stripe Checkout Sessions API with
//! form-encoded requests; amounts cross this boundary as integer minor units.
//!
//! Calls are made once with an explicit timeout. Nothing here retries: a blind
//! retry of session creation could open a second session for the same cart.

use async_trait::async_trait;
use metrics::counter;
use reqwest::{Client, StatusCode};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, instrument, warn};
use url::Url;

use crate::models::order::OrderLineItem;
use crate::services::pricing::{round_money, OrderTotals};

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("gateway call timed out")]
    Timeout,
    #[error("gateway transport error: {0}")]
    Transport(String),
    #[error("gateway rejected the request with status {status}: {message}")]
    Upstream { status: u16, message: String },
    #[error("unexpected gateway response: {0}")]
    InvalidResponse(String),
    #[error("amount cannot be expressed in minor units: {0}")]
    InvalidAmount(String),
    #[error("line items sum to {actual} minor units but the order total is {expected}")]
    AmountMismatch { expected: i64, actual: i64 },
    #[error("invalid gateway configuration: {0}")]
    Configuration(String),
}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            GatewayError::Timeout
        } else if err.is_decode() {
            GatewayError::InvalidResponse(err.to_string())
        } else {
            GatewayError::Transport(err.to_string())
        }
    }
}

/// Converts a two-place money amount to integer minor units (paise, cents).
///
/// The amount is rounded to two places first; negative amounts and values
/// beyond `i64` are rejected.
pub fn to_minor_units(amount: Decimal) -> Result<i64, GatewayError> {
    if amount.is_sign_negative() && !amount.is_zero() {
        return Err(GatewayError::InvalidAmount(amount.to_string()));
    }
    (round_money(amount) * Decimal::ONE_HUNDRED)
        .to_i64()
        .ok_or_else(|| GatewayError::InvalidAmount(amount.to_string()))
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GatewayLineItem {
    pub name: String,
    pub unit_amount_minor: i64,
    pub quantity: u32,
}

impl GatewayLineItem {
    fn amount_minor(&self) -> Option<i64> {
        self.unit_amount_minor.checked_mul(i64::from(self.quantity))
    }
}

/// Builds gateway lines whose amounts add up to `totals.total` exactly.
///
/// One line per order line, then `Shipping` when non-zero, then a `Tax` line
/// carrying whatever remains of the total.
pub fn build_line_items(
    lines: &[OrderLineItem],
    totals: &OrderTotals,
) -> Result<Vec<GatewayLineItem>, GatewayError> {
    let mut items = Vec::with_capacity(lines.len() + 2);
    for line in lines {
        items.push(GatewayLineItem {
            name: line.name.clone(),
            unit_amount_minor: to_minor_units(line.unit_price)?,
            quantity: line.quantity,
        });
    }

    let shipping = to_minor_units(totals.shipping)?;
    if shipping > 0 {
        items.push(GatewayLineItem {
            name: "Shipping".to_string(),
            unit_amount_minor: shipping,
            quantity: 1,
        });
    }

    let total = to_minor_units(totals.total)?;
    let so_far = sum_minor_units(&items)?;
    let remainder = total - so_far;
    if remainder < 0 {
        return Err(GatewayError::AmountMismatch {
            expected: total,
            actual: so_far,
        });
    }
    if remainder > 0 {
        items.push(GatewayLineItem {
            name: "Tax".to_string(),
            unit_amount_minor: remainder,
            quantity: 1,
        });
    }

    Ok(items)
}

fn sum_minor_units(items: &[GatewayLineItem]) -> Result<i64, GatewayError> {
    items.iter().try_fold(0i64, |acc, item| {
        item.amount_minor()
            .and_then(|amount| acc.checked_add(amount))
            .ok_or_else(|| GatewayError::InvalidAmount(format!("line {} overflows", item.name)))
    })
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CheckoutSessionRequest {
    pub line_items: Vec<GatewayLineItem>,
    pub total_minor_units: i64,
    pub currency: String,
    pub success_url: String,
    pub cancel_url: String,
    pub customer_email: String,
    /// Correlates the session with the caller; never used for lookups
    pub client_reference_id: Option<String>,
}

impl CheckoutSessionRequest {
    /// Rejects requests whose lines do not add up to the declared total.
    pub fn verify_amounts(&self) -> Result<(), GatewayError> {
        let actual = sum_minor_units(&self.line_items)?;
        if actual != self.total_minor_units {
            return Err(GatewayError::AmountMismatch {
                expected: self.total_minor_units,
                actual,
            });
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GatewaySession {
    pub session_id: String,
    pub redirect_url: String,
    pub payment_intent_id: Option<String>,
}

/// Payment state of a session as reported by the gateway.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SessionState {
    pub paid: bool,
    /// The session can no longer be paid (expired or abandoned)
    pub expired: bool,
    pub payment_intent_id: Option<String>,
    pub transaction_id: Option<String>,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_session(
        &self,
        request: CheckoutSessionRequest,
    ) -> Result<GatewaySession, GatewayError>;

    async fn retrieve_session(&self, session_id: &str) -> Result<SessionState, GatewayError>;
}

/// Stripe Checkout Sessions client.
#[derive(Clone)]
pub struct StripeCheckoutGateway {
    client: Client,
    base_url: Url,
    secret_key: String,
}

impl StripeCheckoutGateway {
    pub fn new(base_url: &str, secret_key: impl Into<String>, timeout: Duration) -> Result<Self, GatewayError> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()
            .map_err(|e| GatewayError::Configuration(e.to_string()))?;
        Self::with_client(base_url, secret_key, client)
    }

    pub fn with_client(
        base_url: &str,
        secret_key: impl Into<String>,
        client: Client,
    ) -> Result<Self, GatewayError> {
        let base_url =
            Url::parse(base_url).map_err(|e| GatewayError::Configuration(e.to_string()))?;
        if base_url.cannot_be_a_base() {
            return Err(GatewayError::Configuration(format!(
                "{} cannot be used as a base URL",
                base_url
            )));
        }
        Ok(Self {
            client,
            base_url,
            secret_key: secret_key.into(),
        })
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, GatewayError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| GatewayError::Configuration("base URL cannot have a path".into()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn form_params(request: &CheckoutSessionRequest) -> Vec<(String, String)> {
        let mut params = vec![
            ("mode".to_string(), "payment".to_string()),
            ("success_url".to_string(), request.success_url.clone()),
            ("cancel_url".to_string(), request.cancel_url.clone()),
            ("customer_email".to_string(), request.customer_email.clone()),
        ];
        if let Some(reference) = &request.client_reference_id {
            params.push(("client_reference_id".to_string(), reference.clone()));
        }
        for (i, item) in request.line_items.iter().enumerate() {
            let prefix = format!("line_items[{i}]");
            params.push((
                format!("{prefix}[price_data][currency]"),
                request.currency.clone(),
            ));
            params.push((
                format!("{prefix}[price_data][product_data][name]"),
                item.name.clone(),
            ));
            params.push((
                format!("{prefix}[price_data][unit_amount]"),
                item.unit_amount_minor.to_string(),
            ));
            params.push((format!("{prefix}[quantity]"), item.quantity.to_string()));
        }
        params
    }

    async fn read_json(response: reqwest::Response) -> Result<StripeSession, GatewayError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(upstream_error(status, &body));
        }
        response.json::<StripeSession>().await.map_err(Into::into)
    }
}

fn upstream_error(status: StatusCode, body: &str) -> GatewayError {
    let message = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| {
            v.pointer("/error/message")
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .unwrap_or_else(|| status.canonical_reason().unwrap_or("error").to_string());
    GatewayError::Upstream {
        status: status.as_u16(),
        message,
    }
}

#[derive(Debug, Deserialize)]
struct StripeSession {
    id: String,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    payment_status: Option<String>,
    /// Either an id or an expanded PaymentIntent object
    #[serde(default)]
    payment_intent: Option<Value>,
}

impl StripeSession {
    fn payment_intent_id(&self) -> Option<String> {
        match self.payment_intent.as_ref()? {
            Value::String(id) => Some(id.clone()),
            Value::Object(obj) => obj.get("id").and_then(Value::as_str).map(str::to_string),
            _ => None,
        }
    }

    fn transaction_id(&self) -> Option<String> {
        let intent = self.payment_intent.as_ref()?.as_object()?;
        match intent.get("latest_charge")? {
            Value::String(id) => Some(id.clone()),
            Value::Object(charge) => charge.get("id").and_then(Value::as_str).map(str::to_string),
            _ => None,
        }
    }

    fn intent_status(&self) -> Option<&str> {
        self.payment_intent
            .as_ref()?
            .as_object()?
            .get("status")?
            .as_str()
    }

    fn state(&self) -> SessionState {
        let paid = matches!(
            self.payment_status.as_deref(),
            Some("paid") | Some("no_payment_required")
        );
        // A completed session stays unpaid while a delayed payment settles; it
        // is only dead once its intent has failed or been canceled.
        let intent_failed = matches!(
            self.intent_status(),
            Some("canceled") | Some("requires_payment_method")
        );
        let expired = match self.status.as_deref() {
            Some("expired") => true,
            Some("complete") => intent_failed,
            _ => false,
        };
        SessionState {
            paid,
            expired: !paid && expired,
            payment_intent_id: self.payment_intent_id(),
            transaction_id: self.transaction_id(),
        }
    }
}

#[async_trait]
impl PaymentGateway for StripeCheckoutGateway {
    #[instrument(skip(self, request), fields(total_minor_units = request.total_minor_units))]
    async fn create_session(
        &self,
        request: CheckoutSessionRequest,
    ) -> Result<GatewaySession, GatewayError> {
        request.verify_amounts()?;
        counter!("food_order_gateway.calls", 1, "op" => "create_session");

        let url = self.endpoint(&["v1", "checkout", "sessions"])?;
        let result = async {
            let response = self
                .client
                .post(url)
                .bearer_auth(&self.secret_key)
                .form(&Self::form_params(&request))
                .send()
                .await?;
            Self::read_json(response).await
        }
        .await;

        let session = result.map_err(|e| {
            warn!(error = %e, "gateway session creation failed");
            counter!("food_order_gateway.failures", 1, "op" => "create_session");
            e
        })?;

        let redirect_url = session.url.clone().ok_or_else(|| {
            GatewayError::InvalidResponse("checkout session has no redirect url".into())
        })?;
        debug!(session_id = %session.id, "gateway session created");

        Ok(GatewaySession {
            payment_intent_id: session.payment_intent_id(),
            session_id: session.id,
            redirect_url,
        })
    }

    #[instrument(skip(self))]
    async fn retrieve_session(&self, session_id: &str) -> Result<SessionState, GatewayError> {
        counter!("food_order_gateway.calls", 1, "op" => "retrieve_session");

        let url = self.endpoint(&["v1", "checkout", "sessions", session_id])?;
        let result = async {
            let response = self
                .client
                .get(url)
                .bearer_auth(&self.secret_key)
                .query(&[("expand[]", "payment_intent")])
                .send()
                .await?;
            Self::read_json(response).await
        }
        .await;

        let session = result.map_err(|e| {
            warn!(error = %e, "gateway session lookup failed");
            counter!("food_order_gateway.failures", 1, "op" => "retrieve_session");
            e
        })?;

        if session.id != session_id {
            return Err(GatewayError::InvalidResponse(format!(
                "asked for session {} but gateway returned {}",
                session_id, session.id
            )));
        }
        Ok(session.state())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use rust_decimal_macros::dec;
    use serde_json::json;
    use wiremock::matchers::{body_string_contains, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn gateway(server: &MockServer, timeout: Duration) -> StripeCheckoutGateway {
        StripeCheckoutGateway::new(&server.uri(), "sk_test_123", timeout).unwrap()
    }

    fn request() -> CheckoutSessionRequest {
        CheckoutSessionRequest {
            line_items: vec![
                GatewayLineItem {
                    name: "Biryani".into(),
                    unit_amount_minor: 10000,
                    quantity: 2,
                },
                GatewayLineItem {
                    name: "Tax".into(),
                    unit_amount_minor: 2000,
                    quantity: 1,
                },
            ],
            total_minor_units: 22000,
            currency: "inr".into(),
            success_url: "http://localhost:5173/myorder/verify?success=true&session_id={CHECKOUT_SESSION_ID}".into(),
            cancel_url: "http://localhost:5173/checkout?payment_status=cancel".into(),
            customer_email: "asha@example.com".into(),
            client_reference_id: None,
        }
    }

    #[test]
    fn minor_unit_conversion() {
        assert_eq!(to_minor_units(dec!(220.00)).unwrap(), 22000);
        assert_eq!(to_minor_units(dec!(0.1)).unwrap(), 10);
        assert_eq!(to_minor_units(dec!(19.995)).unwrap(), 2000);
        assert_eq!(to_minor_units(Decimal::ZERO).unwrap(), 0);
        assert_matches!(
            to_minor_units(dec!(-1)),
            Err(GatewayError::InvalidAmount(_))
        );
    }

    #[test]
    fn tax_line_closes_the_gap_to_total() {
        let lines = vec![OrderLineItem {
            item_id: "X".into(),
            name: "Thali".into(),
            unit_price: dec!(100),
            quantity: 2,
        }];
        let totals = OrderTotals {
            subtotal: dec!(200.00),
            tax: dec!(20.00),
            shipping: dec!(0.00),
            total: dec!(220.00),
        };
        let items = build_line_items(&lines, &totals).unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[1].name, "Tax");
        assert_eq!(items[1].unit_amount_minor, 2000);
        assert_eq!(sum_minor_units(&items).unwrap(), 22000);
    }

    #[test]
    fn mismatched_lines_are_refused_before_calling_out() {
        let mut req = request();
        req.total_minor_units = 21999;
        assert_matches!(
            req.verify_amounts(),
            Err(GatewayError::AmountMismatch {
                expected: 21999,
                actual: 22000
            })
        );
    }

    #[tokio::test]
    async fn create_session_posts_form_encoded_minor_units() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/checkout/sessions"))
            .and(header("authorization", "Bearer sk_test_123"))
            .and(header("content-type", "application/x-www-form-urlencoded"))
            .and(body_string_contains("mode=payment"))
            .and(body_string_contains(
                "line_items%5B0%5D%5Bprice_data%5D%5Bunit_amount%5D=10000",
            ))
            .and(body_string_contains("line_items%5B1%5D%5Bquantity%5D=1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "cs_test_1",
                "url": "https://checkout.stripe.com/c/pay/cs_test_1",
                "payment_intent": null
            })))
            .expect(1)
            .mount(&server)
            .await;

        let session = gateway(&server, Duration::from_secs(5))
            .create_session(request())
            .await
            .unwrap();
        assert_eq!(session.session_id, "cs_test_1");
        assert_eq!(
            session.redirect_url,
            "https://checkout.stripe.com/c/pay/cs_test_1"
        );
        assert_eq!(session.payment_intent_id, None);
    }

    #[tokio::test]
    async fn upstream_errors_are_surfaced() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/checkout/sessions"))
            .respond_with(ResponseTemplate::new(500).set_body_json(json!({
                "error": { "message": "boom" }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let err = gateway(&server, Duration::from_secs(5))
            .create_session(request())
            .await
            .unwrap_err();
        assert_matches!(err, GatewayError::Upstream { status: 500, ref message } if message == "boom");
    }

    #[tokio::test]
    async fn slow_gateway_times_out_without_retry() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/checkout/sessions/cs_slow"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "id": "cs_slow", "payment_status": "paid" }))
                    .set_delay(Duration::from_millis(500)),
            )
            .expect(1)
            .mount(&server)
            .await;

        let err = gateway(&server, Duration::from_millis(100))
            .retrieve_session("cs_slow")
            .await
            .unwrap_err();
        assert_matches!(err, GatewayError::Timeout);
    }

    #[tokio::test]
    async fn retrieve_session_reads_paid_state_and_ids() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/checkout/sessions/cs_paid"))
            .and(query_param("expand[]", "payment_intent"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "cs_paid",
                "status": "complete",
                "payment_status": "paid",
                "payment_intent": { "id": "pi_1", "latest_charge": "ch_1" }
            })))
            .mount(&server)
            .await;

        let state = gateway(&server, Duration::from_secs(5))
            .retrieve_session("cs_paid")
            .await
            .unwrap();
        assert_eq!(
            state,
            SessionState {
                paid: true,
                expired: false,
                payment_intent_id: Some("pi_1".into()),
                transaction_id: Some("ch_1".into()),
            }
        );
    }

    #[tokio::test]
    async fn expired_session_is_reported_unpaid() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/checkout/sessions/cs_old"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "cs_old",
                "status": "expired",
                "payment_status": "unpaid",
                "payment_intent": "pi_9"
            })))
            .mount(&server)
            .await;

        let state = gateway(&server, Duration::from_secs(5))
            .retrieve_session("cs_old")
            .await
            .unwrap();
        assert!(!state.paid);
        assert!(state.expired);
        assert_eq!(state.payment_intent_id.as_deref(), Some("pi_9"));
        assert_eq!(state.transaction_id, None);
    }

    #[tokio::test]
    async fn delayed_payment_is_open_until_its_intent_fails() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/checkout/sessions/cs_async"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "cs_async",
                "status": "complete",
                "payment_status": "unpaid",
                "payment_intent": { "id": "pi_a", "status": "processing" }
            })))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/checkout/sessions/cs_async"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "cs_async",
                "status": "complete",
                "payment_status": "unpaid",
                "payment_intent": { "id": "pi_a", "status": "requires_payment_method" }
            })))
            .mount(&server)
            .await;

        let gateway = gateway(&server, Duration::from_secs(5));
        let settling = gateway.retrieve_session("cs_async").await.unwrap();
        assert!(!settling.paid && !settling.expired);

        let failed = gateway.retrieve_session("cs_async").await.unwrap();
        assert!(!failed.paid && failed.expired);
    }
}
