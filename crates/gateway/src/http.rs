//! HTTP client for the payment gateway's `POST /v1/payments` endpoint.
//!
//! Responses are decoded into a fixed schema at the boundary. Anything that
//! does not fit (missing data, unknown status, mismatched external id) is
//! reported as [`GatewayError::InvalidResponse`] rather than passed on half
//! parsed. The client applies a request timeout and never retries.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use reimburse_core::config::GatewayConfig;
use reimburse_core::gateway::{
    GatewayError, PaymentGateway, PaymentReceipt, PaymentRequest, PaymentStatus,
};

const DUPLICATE_EXTERNAL_ID: &str = "external id already exists";
const MAX_LOGGED_BODY_CHARS: usize = 512;

pub struct HttpPaymentGateway {
    client: Client,
    endpoint: String,
    api_key: Option<SecretString>,
}

#[derive(Debug, Serialize)]
struct PaymentApiRequest<'a> {
    amount: i64,
    external_id: &'a str,
}

#[derive(Debug, Default, Deserialize)]
pub struct PaymentApiResponse {
    #[serde(default)]
    pub data: Option<PaymentApiData>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PaymentApiData {
    pub id: String,
    pub external_id: String,
    pub status: String,
}

impl HttpPaymentGateway {
    pub fn new(
        base_url: &str,
        timeout: Duration,
        api_key: Option<SecretString>,
    ) -> Result<Self, GatewayError> {
        let base_url = base_url.trim().trim_end_matches('/');
        if base_url.is_empty() {
            return Err(GatewayError::InvalidRequest("gateway base url is required".to_string()));
        }

        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| GatewayError::Transport(error.to_string()))?;

        Ok(Self { client, endpoint: format!("{base_url}/v1/payments"), api_key })
    }

    pub fn from_config(config: &GatewayConfig) -> Result<Self, GatewayError> {
        Self::new(&config.base_url, config.timeout(), config.api_key.clone())
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl PaymentGateway for HttpPaymentGateway {
    async fn process(&self, request: PaymentRequest) -> Result<PaymentReceipt, GatewayError> {
        request.validate()?;

        let mut builder = self.client.post(&self.endpoint).json(&PaymentApiRequest {
            amount: request.amount,
            external_id: request.external_id.as_str(),
        });
        if let Some(api_key) = &self.api_key {
            builder = builder.bearer_auth(api_key.expose_secret());
        }

        let response = builder.send().await.map_err(map_transport_error)?;
        let status = response.status();
        let body = response.bytes().await.map_err(map_transport_error)?;

        match status {
            StatusCode::OK => {
                let parsed = decode_body(&body)?;
                receipt_from(parsed.data, &request)
            }
            StatusCode::BAD_REQUEST => {
                let parsed = decode_body(&body).ok();
                let message = parsed
                    .as_ref()
                    .and_then(|parsed| parsed.message.clone())
                    .unwrap_or_default();
                if message.trim().to_ascii_lowercase().contains(DUPLICATE_EXTERNAL_ID) {
                    debug!(
                        event_name = "gateway.payment.duplicate",
                        external_id = %request.external_id.as_str(),
                        "gateway already holds this external id; using original transaction"
                    );
                    return receipt_from(parsed.and_then(|parsed| parsed.data), &request);
                }
                Err(rejected(status, message, &body))
            }
            _ => {
                let message =
                    decode_body(&body).ok().and_then(|parsed| parsed.message).unwrap_or_default();
                Err(rejected(status, message, &body))
            }
        }
    }
}

fn decode_body(body: &[u8]) -> Result<PaymentApiResponse, GatewayError> {
    if body.is_empty() {
        return Ok(PaymentApiResponse::default());
    }
    serde_json::from_slice(body).map_err(|error| GatewayError::InvalidResponse(error.to_string()))
}

fn receipt_from(
    data: Option<PaymentApiData>,
    request: &PaymentRequest,
) -> Result<PaymentReceipt, GatewayError> {
    let data = data.ok_or_else(|| {
        GatewayError::InvalidResponse("response is missing payment data".to_string())
    })?;

    if data.id.trim().is_empty() {
        return Err(GatewayError::InvalidResponse("payment id is empty".to_string()));
    }
    if data.external_id != request.external_id.as_str() {
        return Err(GatewayError::InvalidResponse(format!(
            "external id mismatch: sent `{}`, received `{}`",
            request.external_id.as_str(),
            data.external_id
        )));
    }

    let status = match data.status.trim().to_ascii_lowercase().as_str() {
        "pending" => PaymentStatus::Pending,
        "completed" | "success" => PaymentStatus::Completed,
        "failed" => return Err(GatewayError::Declined { transaction_id: data.id }),
        other => {
            return Err(GatewayError::InvalidResponse(format!("unknown payment status `{other}`")))
        }
    };

    Ok(PaymentReceipt { transaction_id: data.id, external_id: data.external_id, status })
}

fn rejected(status: StatusCode, message: String, body: &[u8]) -> GatewayError {
    let snippet: String = String::from_utf8_lossy(body).chars().take(MAX_LOGGED_BODY_CHARS).collect();
    warn!(
        event_name = "gateway.payment.rejected",
        status = status.as_u16(),
        body = %snippet,
        "payment api returned an error status"
    );

    let message = if message.trim().is_empty() {
        status.canonical_reason().unwrap_or("unexpected status").to_string()
    } else {
        message
    };
    GatewayError::Rejected { status: status.as_u16(), message }
}

fn map_transport_error(error: reqwest::Error) -> GatewayError {
    if error.is_timeout() {
        GatewayError::Timeout
    } else {
        GatewayError::Transport(error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use axum::extract::State;
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::post;
    use axum::{Json, Router};
    use serde_json::{json, Value};

    use reimburse_core::domain::settlement::IdempotencyKey;
    use reimburse_core::gateway::{GatewayError, PaymentGateway, PaymentRequest, PaymentStatus};

    use super::HttpPaymentGateway;

    type Reply = (StatusCode, Value);

    #[derive(Clone)]
    struct FakeGateway {
        reply: Arc<dyn Fn(&Value) -> Reply + Send + Sync>,
        delay: Duration,
        calls: Arc<AtomicUsize>,
        saw_bearer: Arc<AtomicUsize>,
    }

    async fn handle(
        State(fake): State<FakeGateway>,
        headers: HeaderMap,
        Json(body): Json<Value>,
    ) -> (StatusCode, Json<Value>) {
        fake.calls.fetch_add(1, Ordering::SeqCst);
        if headers.get("authorization").and_then(|value| value.to_str().ok())
            == Some("Bearer gw-key")
        {
            fake.saw_bearer.fetch_add(1, Ordering::SeqCst);
        }
        if !fake.delay.is_zero() {
            tokio::time::sleep(fake.delay).await;
        }
        let (status, payload) = (fake.reply)(&body);
        (status, Json(payload))
    }

    async fn spawn_fake(
        delay: Duration,
        reply: impl Fn(&Value) -> Reply + Send + Sync + 'static,
    ) -> (String, FakeGateway) {
        let fake = FakeGateway {
            reply: Arc::new(reply),
            delay,
            calls: Arc::new(AtomicUsize::new(0)),
            saw_bearer: Arc::new(AtomicUsize::new(0)),
        };
        let app = Router::new().route("/v1/payments", post(handle)).with_state(fake.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let address = listener.local_addr().expect("local addr");
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        (format!("http://{address}/"), fake)
    }

    fn request(key: &str) -> PaymentRequest {
        PaymentRequest { amount: 1_500_000, external_id: IdempotencyKey(key.to_string()) }
    }

    fn echo_data(body: &Value, status: &str) -> Value {
        json!({
            "data": {
                "id": "trx-001",
                "external_id": body["external_id"],
                "status": status,
            },
            "message": "ok",
        })
    }

    #[tokio::test]
    async fn ok_response_becomes_receipt() {
        let (base_url, fake) =
            spawn_fake(Duration::ZERO, |body| (StatusCode::OK, echo_data(body, "completed"))).await;
        let gateway = HttpPaymentGateway::new(
            &base_url,
            Duration::from_secs(5),
            Some("gw-key".to_string().into()),
        )
        .expect("client");

        let receipt = gateway.process(request("E-100")).await.expect("payment");

        assert_eq!(receipt.transaction_id, "trx-001");
        assert_eq!(receipt.external_id, "E-100");
        assert_eq!(receipt.status, PaymentStatus::Completed);
        assert_eq!(fake.calls.load(Ordering::SeqCst), 1);
        assert_eq!(fake.saw_bearer.load(Ordering::SeqCst), 1);
        assert!(gateway.endpoint().ends_with("/v1/payments"));
        assert!(!gateway.endpoint().contains("//v1"));
    }

    #[tokio::test]
    async fn duplicate_external_id_is_translated_into_original_result() {
        let (base_url, _) = spawn_fake(Duration::ZERO, |body| {
            let mut payload = echo_data(body, "completed");
            payload["message"] = json!("External ID already exists");
            (StatusCode::BAD_REQUEST, payload)
        })
        .await;
        let gateway =
            HttpPaymentGateway::new(&base_url, Duration::from_secs(5), None).expect("client");

        let receipt = gateway.process(request("E-101")).await.expect("original result");
        assert_eq!(receipt.transaction_id, "trx-001");
        assert_eq!(receipt.external_id, "E-101");
    }

    #[tokio::test]
    async fn other_client_errors_are_rejections() {
        let (base_url, _) = spawn_fake(Duration::ZERO, |_| {
            (StatusCode::BAD_REQUEST, json!({ "message": "amount exceeds limit" }))
        })
        .await;
        let gateway =
            HttpPaymentGateway::new(&base_url, Duration::from_secs(5), None).expect("client");

        let error = gateway.process(request("E-102")).await.expect_err("rejected");
        assert_eq!(
            error,
            GatewayError::Rejected { status: 400, message: "amount exceeds limit".to_string() }
        );
    }

    #[tokio::test]
    async fn server_errors_are_rejections() {
        let (base_url, _) =
            spawn_fake(Duration::ZERO, |_| (StatusCode::SERVICE_UNAVAILABLE, json!({}))).await;
        let gateway =
            HttpPaymentGateway::new(&base_url, Duration::from_secs(5), None).expect("client");

        let error = gateway.process(request("E-103")).await.expect_err("unavailable");
        assert!(matches!(error, GatewayError::Rejected { status: 503, .. }));
    }

    #[tokio::test]
    async fn unknown_shapes_are_invalid_responses() {
        let (base_url, _) = spawn_fake(Duration::ZERO, |body| {
            (StatusCode::OK, echo_data(body, "teleported"))
        })
        .await;
        let gateway =
            HttpPaymentGateway::new(&base_url, Duration::from_secs(5), None).expect("client");
        let error = gateway.process(request("E-104")).await.expect_err("unknown status");
        assert!(matches!(error, GatewayError::InvalidResponse(_)));

        let (base_url, _) =
            spawn_fake(Duration::ZERO, |_| (StatusCode::OK, json!({ "message": "ok" }))).await;
        let gateway =
            HttpPaymentGateway::new(&base_url, Duration::from_secs(5), None).expect("client");
        let error = gateway.process(request("E-105")).await.expect_err("missing data");
        assert!(matches!(error, GatewayError::InvalidResponse(_)));
    }

    #[tokio::test]
    async fn failed_payment_status_is_declined() {
        let (base_url, _) =
            spawn_fake(Duration::ZERO, |body| (StatusCode::OK, echo_data(body, "failed"))).await;
        let gateway =
            HttpPaymentGateway::new(&base_url, Duration::from_secs(5), None).expect("client");

        let error = gateway.process(request("E-106")).await.expect_err("declined");
        assert_eq!(error, GatewayError::Declined { transaction_id: "trx-001".to_string() });
    }

    #[tokio::test]
    async fn slow_gateway_times_out() {
        let (base_url, _) = spawn_fake(Duration::from_secs(2), |body| {
            (StatusCode::OK, echo_data(body, "completed"))
        })
        .await;
        let gateway =
            HttpPaymentGateway::new(&base_url, Duration::from_millis(100), None).expect("client");

        let error = gateway.process(request("E-107")).await.expect_err("timeout");
        assert_eq!(error, GatewayError::Timeout);
    }

    #[tokio::test]
    async fn invalid_requests_never_reach_the_network() {
        let (base_url, fake) =
            spawn_fake(Duration::ZERO, |body| (StatusCode::OK, echo_data(body, "completed"))).await;
        let gateway =
            HttpPaymentGateway::new(&base_url, Duration::from_secs(5), None).expect("client");

        let error = gateway
            .process(PaymentRequest { amount: 0, external_id: IdempotencyKey("E-108".to_string()) })
            .await
            .expect_err("invalid amount");
        assert!(matches!(error, GatewayError::InvalidRequest(_)));
        assert_eq!(fake.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn unreachable_gateway_is_a_transport_error() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let address = listener.local_addr().expect("addr");
        drop(listener);

        let gateway =
            HttpPaymentGateway::new(&format!("http://{address}"), Duration::from_secs(2), None)
                .expect("client");
        let error = gateway.process(request("E-109")).await.expect_err("refused");
        assert!(matches!(error, GatewayError::Transport(_)));
    }
}
