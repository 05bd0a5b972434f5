#![allow(dead_code)]

use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc,
};

use async_trait::async_trait;
use axum::{
    body::{self, Body},
    http::{Method, Request},
    response::Response,
    Router,
};
use dashmap::DashMap;
use food_order_api::{
    auth::{AuthConfig, AuthService, ADMIN_ROLE},
    config::AppConfig,
    db::{self, DbConfig},
    events::{self, EventSender},
    handlers::AppServices,
    services::{
        catalog::InMemoryCatalog,
        payment_gateway::{
            CheckoutSessionRequest, GatewayError, GatewaySession, PaymentGateway, SessionState,
        },
    },
    AppState,
};
use rust_decimal_macros::dec;
use serde_json::{json, Value};
use tower::ServiceExt;

pub const TEST_JWT_SECRET: &str =
    "k7Qp2vX9mR4tL8wZ1cF6hJ3nB5yD0gS7uE2aV9xK4qT8rM1pW6zC3fH5jN0bG2dY";

/// Scriptable stand-in for the hosted checkout provider.
///
/// Sessions are numbered `cs_test_1`, `cs_test_2`, ... and start unpaid. Tests
/// flip them with [`FakeGateway::mark_paid`] / [`FakeGateway::mark_expired`].
#[derive(Default)]
pub struct FakeGateway {
    sessions: DashMap<String, SessionState>,
    requests: DashMap<String, CheckoutSessionRequest>,
    create_calls: AtomicUsize,
    retrieve_calls: AtomicUsize,
    failing: AtomicBool,
}

impl FakeGateway {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Makes every subsequent call fail as if the gateway were down.
    pub fn fail_all(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn mark_paid(&self, session_id: &str) {
        self.sessions.insert(
            session_id.to_string(),
            SessionState {
                paid: true,
                expired: false,
                payment_intent_id: Some(format!("pi_{session_id}")),
                transaction_id: Some(format!("ch_{session_id}")),
            },
        );
    }

    pub fn mark_expired(&self, session_id: &str) {
        self.sessions.insert(
            session_id.to_string(),
            SessionState {
                expired: true,
                ..SessionState::default()
            },
        );
    }

    pub fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    pub fn retrieve_calls(&self) -> usize {
        self.retrieve_calls.load(Ordering::SeqCst)
    }

    pub fn request_for(&self, session_id: &str) -> Option<CheckoutSessionRequest> {
        self.requests.get(session_id).map(|r| r.clone())
    }
}

#[async_trait]
impl PaymentGateway for FakeGateway {
    async fn create_session(
        &self,
        request: CheckoutSessionRequest,
    ) -> Result<GatewaySession, GatewayError> {
        let n = self.create_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.failing.load(Ordering::SeqCst) {
            return Err(GatewayError::Upstream {
                status: 503,
                message: "gateway down".to_string(),
            });
        }
        request.verify_amounts()?;

        let session_id = format!("cs_test_{n}");
        self.sessions
            .insert(session_id.clone(), SessionState::default());
        self.requests.insert(session_id.clone(), request);
        Ok(GatewaySession {
            redirect_url: format!("https://checkout.test/pay/{session_id}"),
            payment_intent_id: None,
            session_id,
        })
    }

    async fn retrieve_session(&self, session_id: &str) -> Result<SessionState, GatewayError> {
        self.retrieve_calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(GatewayError::Timeout);
        }
        self.sessions
            .get(session_id)
            .map(|s| s.clone())
            .ok_or_else(|| GatewayError::Upstream {
                status: 404,
                message: format!("No such checkout.session: {session_id}"),
            })
    }
}

/// Helper harness for spinning up an application state backed by an in-memory SQLite database.
pub struct TestApp {
    router: Router,
    pub state: AppState,
    pub gateway: Arc<FakeGateway>,
    pub catalog: InMemoryCatalog,
    auth_service: Arc<AuthService>,
    _event_task: tokio::task::JoinHandle<()>,
}

impl TestApp {
    /// Construct a new test application with fresh database state.
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    /// Like [`TestApp::new`], with a hook to adjust configuration first.
    pub async fn with_config(adjust: impl FnOnce(&mut AppConfig)) -> Self {
        let mut cfg = AppConfig::new(
            "sqlite::memory:".to_string(),
            TEST_JWT_SECRET.to_string(),
            "127.0.0.1".to_string(),
            18_080,
            "test".to_string(),
        );
        cfg.cors_allow_any_origin = true;
        adjust(&mut cfg);

        let pool = db::establish_connection_with_config(&DbConfig::in_memory_sqlite())
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");
        let db_arc = Arc::new(pool);

        let (event_sender, event_rx) = EventSender::channel(256);
        let event_task = tokio::spawn(events::process_events(event_rx));

        let catalog = InMemoryCatalog::new()
            .with_item("thali", "Veg Thali", dec!(100))
            .with_item("naan", "Butter Naan", dec!(20))
            .with_item("lassi", "Sweet Lassi", dec!(40));
        let gateway = FakeGateway::new();

        let auth_service = Arc::new(AuthService::new(AuthConfig::from(&cfg)));
        let services = AppServices::new(
            db_arc.clone(),
            Arc::new(catalog.clone()),
            gateway.clone(),
            event_sender.clone(),
            &cfg,
        );

        let state = AppState {
            db: db_arc,
            config: Arc::new(cfg),
            auth: auth_service.clone(),
            services,
            event_sender,
        };

        Self {
            router: food_order_api::build_router(state.clone()),
            state,
            gateway,
            catalog,
            auth_service,
            _event_task: event_task,
        }
    }

    /// Bearer token for a customer.
    pub fn customer_token(&self, user_id: &str, email: &str) -> String {
        self.auth_service
            .generate_token(user_id, Some(email), &["customer"])
            .expect("customer token")
    }

    /// Bearer token for a staff member with the admin role.
    pub fn admin_token(&self) -> String {
        self.auth_service
            .generate_token("admin-1", Some("staff@example.com"), &[ADMIN_ROLE])
            .expect("admin token")
    }

    /// Send a request against the router with an optional bearer token.
    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        token: Option<&str>,
    ) -> Response {
        let mut builder = Request::builder().method(method).uri(uri);

        if let Some(tok) = token {
            builder = builder.header("authorization", format!("Bearer {}", tok));
        }

        let body = if let Some(json) = body {
            builder = builder.header("content-type", "application/json");
            Body::from(serde_json::to_vec(&json).expect("failed to serialize json request body"))
        } else {
            Body::empty()
        };

        self.send(builder.body(body).expect("failed to build request"))
            .await
    }

    pub async fn send(&self, request: Request<Body>) -> Response {
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during test request")
    }

    /// Places an order and returns the `data` of the envelope.
    pub async fn place_order(&self, token: &str, payload: Value) -> Value {
        let response = self
            .request(Method::POST, "/api/v1/orders", Some(payload), Some(token))
            .await;
        assert_eq!(response.status(), 201, "order placement should succeed");
        response_json(response).await["data"].clone()
    }

    pub async fn confirm(&self, session_id: &str) -> Response {
        self.request(
            Method::GET,
            &format!("/api/v1/orders/confirm?session_id={session_id}"),
            None,
            None,
        )
        .await
    }
}

impl Drop for TestApp {
    fn drop(&mut self) {
        self._event_task.abort();
    }
}

pub async fn response_json(response: Response) -> Value {
    let bytes = body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("response body bytes");
    serde_json::from_slice(&bytes).expect("json response")
}

/// A valid checkout body for the given payment method and cart.
pub fn order_payload(payment_method: &str, items: Value) -> Value {
    json!({
        "contact": {
            "firstName": "Asha",
            "lastName": "Rao",
            "email": "asha@example.com",
            "phone": "9876543210"
        },
        "shippingAddress": {
            "address": "12 MG Road",
            "city": "Bengaluru",
            "zipCode": "560001",
            "state": "KA",
            "country": "IN"
        },
        "paymentMethod": payment_method,
        "items": items
    })
}
