use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::{to_bytes, Body};
use axum::http::{header, Method, Request, StatusCode};
use axum::response::Response;
use futures::future::join_all;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::{json, Value};
use sqlx::SqlitePool;
use tempfile::TempDir;
use tokio::sync::mpsc;
use tower::ServiceExt;

use crate::api::{self, ApiSettings, ApiState};
use crate::db;
use crate::errors::{AppError, Result};
use crate::invariants;
use crate::ledger::Ledger;
use crate::models::{CampaignStatus, NewCampaign, PaymentEventKind, PaymentStatus};
use crate::notifier::{Notification, NotificationQueue, VolunteerEmail};
use crate::providers::paypal::{CreatedPayment, ExecutedPayment, PayPalApi, PayPalPaymentRequest};
use crate::providers::stripe::{self, PaymentIntent, PaymentIntentRequest, StripeApi};
use crate::providers::PaymentGateways;

const WEBHOOK_SECRET: &str = "whsec_test";
const ADMIN_TOKEN: &str = "admin-secret";
const FRONTEND: &str = "https://donate.example.org";

// ─────────────────────────────────────────────────────────
// Stub gateways
// ─────────────────────────────────────────────────────────

#[derive(Default)]
struct StubStripe {
    refuse: bool,
}

#[async_trait]
impl StripeApi for StubStripe {
    async fn create_payment_intent(&self, req: &PaymentIntentRequest) -> Result<PaymentIntent> {
        if self.refuse {
            return Err(AppError::Provider("stripe: card network unavailable".into()));
        }
        Ok(PaymentIntent {
            id: format!("pi_{}", &req.donation_id[..8]),
            client_secret: Some("pi_secret_test".into()),
        })
    }

    fn verify_webhook(&self, payload: &[u8], signature_header: &str) -> Result<()> {
        stripe::verify_signature(
            payload,
            signature_header,
            WEBHOOK_SECRET,
            Duration::from_secs(300),
            chrono::Utc::now().timestamp(),
        )
    }
}

#[derive(Default)]
struct StubPayPal {
    refuse_execute: bool,
    /// Only the first execute captures; later ones report the sale as done.
    single_capture: bool,
    capture_delay: Duration,
    executions: AtomicUsize,
    created: Mutex<Vec<PayPalPaymentRequest>>,
}

#[async_trait]
impl PayPalApi for StubPayPal {
    async fn create_payment(&self, req: &PayPalPaymentRequest) -> Result<CreatedPayment> {
        self.created.lock().unwrap().push(req.clone());
        Ok(CreatedPayment {
            payment_id: "PAY-1".into(),
            approval_url: "https://paypal.test/approve?token=EC-1".into(),
        })
    }

    async fn execute_payment(&self, payment_id: &str, _payer_id: &str) -> Result<ExecutedPayment> {
        if self.refuse_execute {
            return Err(AppError::Provider("paypal: INSTRUMENT_DECLINED".into()));
        }
        assert_eq!(payment_id, "PAY-1");
        let attempt = self.executions.fetch_add(1, Ordering::SeqCst);
        if self.single_capture && attempt > 0 {
            return Err(AppError::Provider("paypal: PAYMENT_ALREADY_DONE".into()));
        }
        tokio::time::sleep(self.capture_delay).await;
        Ok(ExecutedPayment {
            transaction_id: "SALE-1".into(),
        })
    }
}

// ─────────────────────────────────────────────────────────
// Harness
// ─────────────────────────────────────────────────────────

struct TestApp {
    _dir: TempDir,
    state: Arc<ApiState>,
    paypal: Arc<StubPayPal>,
    notifications: Mutex<mpsc::Receiver<Notification>>,
}

async fn setup_with(stripe: StubStripe, paypal: StubPayPal) -> TestApp {
    setup_with_busy_timeout(stripe, paypal, Duration::from_secs(5)).await
}

async fn setup_with_busy_timeout(
    stripe: StubStripe,
    paypal: StubPayPal,
    busy_timeout: Duration,
) -> TestApp {
    let dir = tempfile::tempdir().unwrap();
    let pool = db::init_pool(dir.path().join("api.db").to_str().unwrap(), busy_timeout)
        .await
        .unwrap();
    let (queue, notifications) = NotificationQueue::new(64);
    let paypal = Arc::new(paypal);

    let state = Arc::new(ApiState {
        pool: pool.clone(),
        ledger: Ledger::new(pool, queue.clone()),
        notifications: queue,
        gateways: PaymentGateways {
            stripe: Arc::new(stripe),
            paypal: paypal.clone(),
        },
        settings: ApiSettings {
            public_base_url: "https://api.example.org".into(),
            frontend_url: FRONTEND.into(),
            currency: "USD".into(),
            admin_token: Some(ADMIN_TOKEN.into()),
        },
    });

    TestApp {
        _dir: dir,
        state,
        paypal,
        notifications: Mutex::new(notifications),
    }
}

async fn setup() -> TestApp {
    setup_with(StubStripe::default(), StubPayPal::default()).await
}

impl TestApp {
    fn pool(&self) -> &SqlitePool {
        &self.state.pool
    }

    /// Everything queued for the notifier so far.
    fn queued(&self) -> Vec<Notification> {
        let mut rx = self.notifications.lock().unwrap();
        std::iter::from_fn(|| rx.try_recv().ok()).collect()
    }

    async fn send(&self, req: Request<Body>) -> Response {
        api::router(self.state.clone()).oneshot(req).await.unwrap()
    }

    async fn get(&self, uri: &str) -> Response {
        self.send(Request::get(uri).body(Body::empty()).unwrap()).await
    }

    async fn post_json(&self, uri: &str, body: Value) -> Response {
        self.send(
            Request::post(uri)
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
    }

    async fn admin(&self, method: Method, uri: &str, body: Option<Value>) -> Response {
        let builder = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::AUTHORIZATION, format!("Bearer {ADMIN_TOKEN}"))
            .header(header::CONTENT_TYPE, "application/json");
        let body = body.map(|b| Body::from(b.to_string())).unwrap_or_else(Body::empty);
        self.send(builder.body(body).unwrap()).await
    }

    async fn webhook(&self, payload: &Value, signature: Option<String>) -> Response {
        let mut builder = Request::post("/stripe/webhook");
        if let Some(sig) = signature {
            builder = builder.header(stripe::SIGNATURE_HEADER, sig);
        }
        self.send(builder.body(Body::from(payload.to_string())).unwrap())
            .await
    }

    async fn campaign(&self, goal_cents: i64, status: CampaignStatus) -> String {
        db::insert_campaign(
            self.pool(),
            &NewCampaign {
                title: "School roof".into(),
                description: "Replace the roof before the rains".into(),
                short_description: "Roof".into(),
                goal_cents,
                image: None,
                status,
                start_date: None,
                end_date: None,
            },
        )
        .await
        .unwrap()
        .id
    }

    async fn donate(&self, campaign: &str, email: &str, amount: &str, method: &str) -> Value {
        let resp = self
            .post_json(
                "/api/donations",
                json!({
                    "campaign": campaign,
                    "donor_name": "Grace Hopper",
                    "donor_email": email,
                    "amount": amount,
                    "payment_method": method,
                }),
            )
            .await;
        assert_eq!(resp.status(), StatusCode::CREATED);
        body_json(resp).await
    }
}

async fn body_json(resp: Response) -> Value {
    let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn decimal(v: &Value) -> Decimal {
    Decimal::from_str(v.as_str().unwrap()).unwrap()
}

fn location(resp: &Response) -> &str {
    resp.headers()
        .get(header::LOCATION)
        .unwrap()
        .to_str()
        .unwrap()
}

fn succeeded_event(donation_id: &str) -> Value {
    json!({
        "id": "evt_1",
        "type": "payment_intent.succeeded",
        "data": { "object": {
            "id": "pi_1",
            "latest_charge": "ch_1",
            "metadata": { "donation_id": donation_id }
        }}
    })
}

fn sign(payload: &Value) -> String {
    stripe::sign(
        payload.to_string().as_bytes(),
        WEBHOOK_SECRET,
        chrono::Utc::now().timestamp(),
    )
}

async fn donation_status(app: &TestApp, id: &str) -> PaymentStatus {
    db::get_donation(app.pool(), id)
        .await
        .unwrap()
        .unwrap()
        .payment_status
}

// ─────────────────────────────────────────────────────────
// Health & campaigns
// ─────────────────────────────────────────────────────────

#[tokio::test]
async fn test_health() {
    let app = setup().await;
    let resp = app.get("/health").await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_json(resp).await["status"], "ok");
}

#[tokio::test]
async fn test_admin_routes_require_token() {
    let app = setup().await;

    let missing = app
        .post_json("/admin/campaigns", json!({ "title": "x" }))
        .await;
    assert_eq!(missing.status(), StatusCode::UNAUTHORIZED);

    for presented in ["Bearer nope", "Bearer admin-secre", "Bearer admin-secret2", ADMIN_TOKEN] {
        let wrong = app
            .send(
                Request::get("/admin/donations/stats")
                    .header(header::AUTHORIZATION, presented)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await;
        assert_eq!(wrong.status(), StatusCode::UNAUTHORIZED, "{presented}");
    }

    let ok = app.admin(Method::GET, "/admin/donations/stats", None).await;
    assert_eq!(ok.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_create_and_list_campaigns() {
    let app = setup().await;

    let resp = app
        .admin(
            Method::POST,
            "/admin/campaigns",
            Some(json!({
                "title": "Clean water",
                "description": "Wells for the valley",
                "short_description": "Wells",
                "goal_amount": "100.00"
            })),
        )
        .await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    let created = body_json(resp).await;
    assert_eq!(created["status"], "active");
    assert_eq!(decimal(&created["goal_amount"]), dec!(100));
    assert_eq!(decimal(&created["raised_amount"]), dec!(0));

    app.campaign(5_000, CampaignStatus::Draft).await;

    let listed = body_json(app.get("/api/campaigns").await).await;
    assert_eq!(listed["count"], 1);
    assert_eq!(listed["campaigns"][0]["id"], created["id"]);
}

#[tokio::test]
async fn test_campaign_status_follows_lifecycle() {
    let app = setup().await;
    let id = app.campaign(10_000, CampaignStatus::Draft).await;

    let skip = app
        .admin(
            Method::POST,
            &format!("/admin/campaigns/{id}/status"),
            Some(json!({ "status": "completed" })),
        )
        .await;
    assert_eq!(skip.status(), StatusCode::CONFLICT);
    let body = body_json(skip).await;
    assert_eq!(body["error_code"], "INVALID_STATE_TRANSITION");
    assert_eq!(body["details"]["current_status"], "draft");

    for status in ["active", "completed"] {
        let resp = app
            .admin(
                Method::POST,
                &format!("/admin/campaigns/{id}/status"),
                Some(json!({ "status": status })),
            )
            .await;
        assert_eq!(resp.status(), StatusCode::OK);
    }

    let completed = body_json(app.get("/api/campaigns/completed").await).await;
    assert_eq!(completed["count"], 1);
    assert!(completed["campaigns"][0]["end_date"].is_string());
}

#[tokio::test]
async fn test_unknown_campaign_is_404() {
    let app = setup().await;
    let resp = app
        .get("/api/campaigns/00000000-0000-4000-8000-000000000000")
        .await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_json(resp).await["error_code"], "NOT_FOUND");
}

// ─────────────────────────────────────────────────────────
// Donation creation
// ─────────────────────────────────────────────────────────

#[tokio::test]
async fn test_stripe_donation_returns_client_secret() {
    let app = setup().await;
    let campaign = app.campaign(10_000, CampaignStatus::Active).await;

    let body = app.donate(&campaign, "grace@example.org", "30.00", "stripe").await;

    assert_eq!(body["payment"]["provider"], "stripe");
    assert_eq!(body["payment"]["client_secret"], "pi_secret_test");
    assert_eq!(body["donation"]["payment_status"], "pending");
    assert_eq!(decimal(&body["donation"]["amount"]), dec!(30));
    let id = body["donation"]["id"].as_str().unwrap();
    assert_eq!(
        body["donation"]["payment_intent_id"].as_str().unwrap(),
        format!("pi_{}", &id[..8])
    );
}

#[tokio::test]
async fn test_paypal_donation_returns_approval_url() {
    let app = setup().await;
    let campaign = app.campaign(10_000, CampaignStatus::Active).await;

    let body = app.donate(&campaign, "grace@example.org", "12.50", "paypal").await;
    let id = body["donation"]["id"].as_str().unwrap();

    assert_eq!(body["payment"]["provider"], "paypal");
    assert_eq!(body["payment"]["approval_url"], "https://paypal.test/approve?token=EC-1");
    assert_eq!(body["donation"]["paypal_order_id"], "PAY-1");

    let created = app.paypal.created.lock().unwrap();
    assert_eq!(created[0].amount, "12.50");
    assert_eq!(
        created[0].return_url,
        format!("https://api.example.org/paypal/execute/{id}")
    );
    assert_eq!(
        created[0].cancel_url,
        format!("https://api.example.org/paypal/cancel/{id}")
    );
}

#[tokio::test]
async fn test_donation_validation() {
    let app = setup().await;
    let active = app.campaign(10_000, CampaignStatus::Active).await;
    let paused = app.campaign(10_000, CampaignStatus::Paused).await;

    let cases = [
        (json!({ "campaign": active, "donor_name": "G", "donor_email": "not-an-email",
                 "amount": "5.00", "payment_method": "stripe" }), StatusCode::BAD_REQUEST),
        (json!({ "campaign": active, "donor_name": "G", "donor_email": "g@example.org",
                 "amount": "10.005", "payment_method": "stripe" }), StatusCode::BAD_REQUEST),
        (json!({ "campaign": active, "donor_name": "G", "donor_email": "g@example.org",
                 "amount": "0", "payment_method": "stripe" }), StatusCode::BAD_REQUEST),
        (json!({ "campaign": paused, "donor_name": "G", "donor_email": "g@example.org",
                 "amount": "5.00", "payment_method": "stripe" }), StatusCode::BAD_REQUEST),
        (json!({ "campaign": "00000000-0000-4000-8000-000000000000", "donor_name": "G",
                 "donor_email": "g@example.org", "amount": "5.00", "payment_method": "stripe" }),
         StatusCode::NOT_FOUND),
    ];

    for (body, expected) in cases {
        let resp = app.post_json("/api/donations", body.clone()).await;
        assert_eq!(resp.status(), expected, "request {body}");
    }

    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM donations")
        .fetch_one(app.pool())
        .await
        .unwrap();
    assert_eq!(count, 0);
}

#[tokio::test]
async fn test_provider_refusal_fails_donation() {
    let app = setup_with(StubStripe { refuse: true }, StubPayPal::default()).await;
    let campaign = app.campaign(10_000, CampaignStatus::Active).await;

    let resp = app
        .post_json(
            "/api/donations",
            json!({
                "campaign": campaign,
                "donor_name": "Grace Hopper",
                "donor_email": "grace@example.org",
                "amount": "30.00",
                "payment_method": "stripe",
            }),
        )
        .await;
    assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);

    let (status,): (String,) = sqlx::query_as("SELECT payment_status FROM donations")
        .fetch_one(app.pool())
        .await
        .unwrap();
    assert_eq!(status, "failed");
}

// ─────────────────────────────────────────────────────────
// Stripe webhook
// ─────────────────────────────────────────────────────────

#[tokio::test]
async fn test_signed_webhook_completes_donation_once() {
    let app = setup().await;
    let campaign = app.campaign(10_000, CampaignStatus::Active).await;
    let donation = app.donate(&campaign, "grace@example.org", "30.00", "stripe").await;
    let id = donation["donation"]["id"].as_str().unwrap();
    let payload = succeeded_event(id);

    for _ in 0..2 {
        let resp = app.webhook(&payload, Some(sign(&payload))).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let ack = body_json(resp).await;
        assert_eq!(ack["received"], true);
        assert_eq!(ack["status"], "completed");
    }

    let view = body_json(app.get(&format!("/api/campaigns/{campaign}")).await).await;
    assert_eq!(decimal(&view["raised_amount"]), dec!(30));
    assert_eq!(decimal(&view["progress_percentage"]), dec!(30));

    let stored = db::get_donation(app.pool(), id).await.unwrap().unwrap();
    assert_eq!(stored.transaction_id.as_deref(), Some("ch_1"));
    invariants::assert_applied_once(app.pool(), id).await;

    let audit = body_json(
        app.admin(Method::GET, &format!("/admin/donations/{id}/events"), None)
            .await,
    )
    .await;
    assert_eq!(audit["status"], "completed");
    assert_eq!(audit["events"][0]["outcome"], "applied");
    assert_eq!(audit["events"][1]["outcome"], "ignored");
    assert_eq!(audit["events"][1]["provider_reference"], "ch_1");
    invariants::assert_raised_matches_completed(app.pool(), &campaign).await;
}

#[tokio::test]
async fn test_unverifiable_webhook_touches_nothing() {
    let app = setup().await;
    let campaign = app.campaign(10_000, CampaignStatus::Active).await;
    let donation = app.donate(&campaign, "grace@example.org", "30.00", "stripe").await;
    let id = donation["donation"]["id"].as_str().unwrap();
    let payload = succeeded_event(id);

    let forged = stripe::sign(
        payload.to_string().as_bytes(),
        "whsec_other",
        chrono::Utc::now().timestamp(),
    );
    let stale = stripe::sign(
        payload.to_string().as_bytes(),
        WEBHOOK_SECRET,
        chrono::Utc::now().timestamp() - 3_600,
    );

    for signature in [None, Some(forged), Some(stale)] {
        let resp = app.webhook(&payload, signature).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(resp).await["error_code"], "PROVIDER_VERIFICATION_FAILED");
    }

    assert_eq!(donation_status(&app, id).await, PaymentStatus::Pending);
    let events = db::get_payment_events(app.pool(), id).await.unwrap();
    assert!(events.is_empty());
}

#[tokio::test]
async fn test_unhandled_event_type_is_acknowledged() {
    let app = setup().await;
    let payload = json!({
        "id": "evt_2",
        "type": "charge.refund.updated",
        "data": { "object": { "id": "re_1" } }
    });

    let resp = app.webhook(&payload, Some(sign(&payload))).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let ack = body_json(resp).await;
    assert_eq!(ack["received"], true);
    assert!(ack.get("status").is_none());
}

#[tokio::test]
async fn test_intent_without_donation_metadata_is_acknowledged() {
    let app = setup().await;
    let campaign = app.campaign(10_000, CampaignStatus::Active).await;
    let payload = json!({
        "id": "evt_3",
        "type": "payment_intent.succeeded",
        "data": { "object": {
            "id": "pi_invoice",
            "latest_charge": "ch_invoice",
            "metadata": {}
        }}
    });

    let resp = app.webhook(&payload, Some(sign(&payload))).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let ack = body_json(resp).await;
    assert_eq!(ack["received"], true);
    assert!(ack.get("status").is_none());
    invariants::assert_raised_matches_completed(app.pool(), &campaign).await;
}

#[tokio::test]
async fn test_webhook_for_unknown_donation_is_404() {
    let app = setup().await;
    let payload = succeeded_event("00000000-0000-4000-8000-000000000000");
    let resp = app.webhook(&payload, Some(sign(&payload))).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_webhook_on_locked_database_is_503() {
    let app = setup_with_busy_timeout(
        StubStripe::default(),
        StubPayPal::default(),
        Duration::from_millis(50),
    )
    .await;
    let campaign = app.campaign(10_000, CampaignStatus::Active).await;
    let donation = app.donate(&campaign, "grace@example.org", "30.00", "stripe").await;
    let id = donation["donation"]["id"].as_str().unwrap();
    let payload = succeeded_event(id);

    let mut lock = app.pool().acquire().await.unwrap();
    sqlx::query("BEGIN IMMEDIATE").execute(&mut *lock).await.unwrap();
    let resp = app.webhook(&payload, Some(sign(&payload))).await;
    sqlx::query("ROLLBACK").execute(&mut *lock).await.unwrap();
    drop(lock);

    assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body_json(resp).await["error_code"], "PERSISTENCE_CONFLICT");
    assert_eq!(donation_status(&app, id).await, PaymentStatus::Pending);
    assert_eq!(
        db::get_campaign(app.pool(), &campaign).await.unwrap().unwrap().raised_cents,
        0
    );

    // Stripe redelivers after a 5xx.
    let resp = app.webhook(&payload, Some(sign(&payload))).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(
        db::get_campaign(app.pool(), &campaign).await.unwrap().unwrap().raised_cents,
        3_000
    );
    invariants::assert_raised_matches_completed(app.pool(), &campaign).await;
}

// ─────────────────────────────────────────────────────────
// PayPal redirects
// ─────────────────────────────────────────────────────────

#[tokio::test]
async fn test_paypal_return_executes_then_completes() {
    let app = setup().await;
    let campaign = app.campaign(10_000, CampaignStatus::Active).await;
    let donation = app.donate(&campaign, "grace@example.org", "80.00", "paypal").await;
    let id = donation["donation"]["id"].as_str().unwrap();

    let resp = app
        .get(&format!("/paypal/execute/{id}?paymentId=PAY-1&PayerID=PAYER-9"))
        .await;
    assert_eq!(resp.status(), StatusCode::SEE_OTHER);
    assert_eq!(
        location(&resp),
        format!("{FRONTEND}/payment/success?donation_id={id}")
    );

    let stored = db::get_donation(app.pool(), id).await.unwrap().unwrap();
    assert_eq!(stored.payment_status, PaymentStatus::Completed);
    assert_eq!(stored.transaction_id.as_deref(), Some("SALE-1"));
    invariants::assert_raised_matches_completed(app.pool(), &campaign).await;
}

#[tokio::test]
async fn test_paypal_return_with_foreign_payment_is_rejected() {
    let app = setup().await;
    let campaign = app.campaign(10_000, CampaignStatus::Active).await;
    let donation = app.donate(&campaign, "grace@example.org", "80.00", "paypal").await;
    let id = donation["donation"]["id"].as_str().unwrap();

    let resp = app
        .get(&format!("/paypal/execute/{id}?paymentId=PAY-OTHER&PayerID=PAYER-9"))
        .await;
    assert_eq!(
        location(&resp),
        format!("{FRONTEND}/payment/failed?donation_id={id}")
    );
    assert_eq!(donation_status(&app, id).await, PaymentStatus::Pending);
}

#[tokio::test]
async fn test_paypal_execute_refusal_leaves_donation_pending() {
    let app = setup_with(
        StubStripe::default(),
        StubPayPal {
            refuse_execute: true,
            ..Default::default()
        },
    )
    .await;
    let campaign = app.campaign(10_000, CampaignStatus::Active).await;
    let donation = app.donate(&campaign, "grace@example.org", "80.00", "paypal").await;
    let id = donation["donation"]["id"].as_str().unwrap();

    let resp = app
        .get(&format!("/paypal/execute/{id}?paymentId=PAY-1&PayerID=PAYER-9"))
        .await;
    assert_eq!(
        location(&resp),
        format!("{FRONTEND}/payment/failed?donation_id={id}")
    );
    assert_eq!(donation_status(&app, id).await, PaymentStatus::Pending);
    assert!(db::get_payment_events(app.pool(), id).await.unwrap().is_empty());
    invariants::assert_raised_matches_completed(app.pool(), &campaign).await;
}

#[tokio::test]
async fn test_repeated_paypal_return_still_credits_captured_sale() {
    let app = setup_with(
        StubStripe::default(),
        StubPayPal {
            single_capture: true,
            capture_delay: Duration::from_millis(300),
            ..Default::default()
        },
    )
    .await;
    let campaign = app.campaign(10_000, CampaignStatus::Active).await;
    let donation = app.donate(&campaign, "grace@example.org", "80.00", "paypal").await;
    let id = donation["donation"]["id"].as_str().unwrap();
    let uri = format!("/paypal/execute/{id}?paymentId=PAY-1&PayerID=PAYER-9");

    // The donor's browser hits the return URL twice while PayPal captures.
    let (first, second) = tokio::join!(app.get(&uri), app.get(&uri));
    let pages = [location(&first).to_string(), location(&second).to_string()];
    assert!(pages.contains(&format!("{FRONTEND}/payment/success?donation_id={id}")));

    let stored = db::get_donation(app.pool(), id).await.unwrap().unwrap();
    assert_eq!(stored.payment_status, PaymentStatus::Completed);
    assert_eq!(stored.transaction_id.as_deref(), Some("SALE-1"));
    assert_eq!(
        db::get_campaign(app.pool(), &campaign).await.unwrap().unwrap().raised_cents,
        8_000
    );
    invariants::assert_raised_matches_completed(app.pool(), &campaign).await;
}

#[tokio::test]
async fn test_paypal_cancel_marks_cancelled() {
    let app = setup().await;
    let campaign = app.campaign(10_000, CampaignStatus::Active).await;
    let donation = app.donate(&campaign, "grace@example.org", "80.00", "paypal").await;
    let id = donation["donation"]["id"].as_str().unwrap();

    let resp = app.get(&format!("/paypal/cancel/{id}")).await;
    assert_eq!(resp.status(), StatusCode::SEE_OTHER);
    assert_eq!(
        location(&resp),
        format!("{FRONTEND}/payment/cancelled?donation_id={id}")
    );
    assert_eq!(donation_status(&app, id).await, PaymentStatus::Cancelled);

    // A late return after cancelling does not resurrect the donation.
    app.get(&format!("/paypal/execute/{id}?paymentId=PAY-1&PayerID=PAYER-9"))
        .await;
    assert_eq!(donation_status(&app, id).await, PaymentStatus::Cancelled);
}

// ─────────────────────────────────────────────────────────
// Refunds & statistics
// ─────────────────────────────────────────────────────────

#[tokio::test]
async fn test_refund_endpoint_scenario() {
    let app = setup().await;
    let campaign = app.campaign(10_000, CampaignStatus::Active).await;
    let first = app.donate(&campaign, "grace@example.org", "30.00", "stripe").await;
    let second = app.donate(&campaign, "alan@example.org", "80.00", "stripe").await;
    let first = first["donation"]["id"].as_str().unwrap().to_string();
    let second = second["donation"]["id"].as_str().unwrap().to_string();

    for id in [&first, &second] {
        let payload = succeeded_event(id);
        let resp = app.webhook(&payload, Some(sign(&payload))).await;
        assert_eq!(resp.status(), StatusCode::OK);
    }

    let view = body_json(app.get(&format!("/api/campaigns/{campaign}")).await).await;
    assert_eq!(decimal(&view["raised_amount"]), dec!(110));
    assert_eq!(decimal(&view["progress_percentage"]), dec!(100));
    assert_eq!(view["is_completed"], true);

    let uri = format!("/admin/donations/{first}/refund");
    let resp = app.admin(Method::POST, &uri, None).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_json(resp).await["status"], "refunded");

    let again = app.admin(Method::POST, &uri, None).await;
    assert_eq!(again.status(), StatusCode::CONFLICT);
    assert_eq!(body_json(again).await["details"]["current_status"], "refunded");

    let view = body_json(app.get(&format!("/api/campaigns/{campaign}")).await).await;
    assert_eq!(decimal(&view["raised_amount"]), dec!(80));
    assert_eq!(view["is_completed"], false);
    invariants::assert_raised_matches_completed(app.pool(), &campaign).await;
}

#[tokio::test]
async fn test_public_donations_hide_anonymous_and_pending() {
    let app = setup().await;
    let campaign = app.campaign(10_000, CampaignStatus::Active).await;

    let shown = app.donate(&campaign, "grace@example.org", "30.00", "stripe").await;
    let shown = shown["donation"]["id"].as_str().unwrap().to_string();
    app.donate(&campaign, "alan@example.org", "10.00", "stripe").await;
    let anonymous = app
        .post_json(
            "/api/donations",
            json!({
                "campaign": campaign,
                "donor_name": "Someone",
                "donor_email": "anon@example.org",
                "amount": "5.00",
                "payment_method": "stripe",
                "is_anonymous": true,
            }),
        )
        .await;
    let anonymous = body_json(anonymous).await["donation"]["id"]
        .as_str()
        .unwrap()
        .to_string();

    for id in [&shown, &anonymous] {
        app.state
            .ledger
            .apply_payment_event(id, PaymentEventKind::Confirmed, None)
            .await
            .unwrap();
    }

    let listed = body_json(app.get(&format!("/api/campaigns/{campaign}/donations")).await).await;
    assert_eq!(listed["count"], 1);
    assert_eq!(listed["donations"][0]["id"], shown.as_str());
    assert!(listed["donations"][0].get("donor_email").is_none());
}

#[tokio::test]
async fn test_donation_stats() {
    let app = setup().await;
    let campaign = app.campaign(100_000, CampaignStatus::Active).await;

    let mut ids = Vec::new();
    for (email, amount) in [
        ("grace@example.org", "30.00"),
        ("grace@example.org", "45.00"),
        ("alan@example.org", "80.00"),
    ] {
        let body = app.donate(&campaign, email, amount, "stripe").await;
        ids.push(body["donation"]["id"].as_str().unwrap().to_string());
    }
    app.donate(&campaign, "pending@example.org", "500.00", "stripe").await;

    for id in &ids {
        app.state
            .ledger
            .apply_payment_event(id, PaymentEventKind::Confirmed, None)
            .await
            .unwrap();
    }

    let resp = app.admin(Method::GET, "/admin/donations/stats", None).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let stats = body_json(resp).await;

    assert_eq!(decimal(&stats["total_donations"]), dec!(155));
    assert_eq!(stats["total_donors"], 2);
    assert_eq!(decimal(&stats["average_donation"]), dec!(51.67));
    let monthly = stats["monthly_donations"].as_array().unwrap();
    assert_eq!(monthly.len(), 12);
    assert_eq!(decimal(&monthly[11]), dec!(155));
    assert_eq!(stats["recent_donations"].as_array().unwrap().len(), 3);
}

// ─────────────────────────────────────────────────────────
// Volunteers
// ─────────────────────────────────────────────────────────

impl TestApp {
    async fn opportunity(&self, max_volunteers: i64) -> String {
        let resp = self
            .admin(
                Method::POST,
                "/admin/volunteers/opportunities",
                Some(json!({
                    "title": "Food bank shift",
                    "description": "Sort and pack donations",
                    "short_description": "Sort food",
                    "opportunity_type": "ongoing",
                    "location": "Main warehouse",
                    "skills_required": "None",
                    "time_commitment": "3 hours/week",
                    "max_volunteers": max_volunteers,
                    "start_date": "2025-01-01T09:00:00Z",
                    "contact_person": "Mary Seacole",
                    "contact_email": "mary@example.org",
                    "contact_phone": "555-0100"
                })),
            )
            .await;
        assert_eq!(resp.status(), StatusCode::CREATED);
        body_json(resp).await["id"].as_str().unwrap().to_string()
    }

    async fn apply(&self, opportunity: &str, email: &str) -> Response {
        self.post_json(
            "/api/volunteers/applications",
            json!({
                "opportunity": opportunity,
                "first_name": "Florence",
                "last_name": "Nightingale",
                "email": email,
                "phone": "555-0101",
                "date_of_birth": "1990-05-12",
                "address": "1 Lamp St",
                "city": "Springfield",
                "state": "IL",
                "zip_code": "62701",
                "availability": "weekends",
                "skills_and_interests": "Logistics",
                "why_volunteer": "To help",
                "emergency_contact_name": "Parthenope",
                "emergency_contact_phone": "555-0102",
                "emergency_contact_relationship": "Sister",
                "background_check_consent": true
            }),
        )
        .await
    }

    async fn review(&self, application: &str, status: &str) -> Response {
        self.admin(
            Method::POST,
            &format!("/admin/volunteers/applications/{application}/review"),
            Some(json!({ "status": status, "reviewed_by": "coordinator" })),
        )
        .await
    }
}

#[tokio::test]
async fn test_volunteer_application_claims_a_place_and_queues_email() {
    let app = setup().await;
    let opportunity = app.opportunity(2).await;

    let listed = body_json(app.get("/api/volunteers/opportunities").await).await;
    assert_eq!(listed["count"], 1);
    assert_eq!(listed["opportunities"][0]["spots_remaining"], 2);

    let resp = app.apply(&opportunity, "florence@example.org").await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    let application = body_json(resp).await;
    assert_eq!(application["status"], "pending");
    assert_eq!(application["full_name"], "Florence Nightingale");
    assert_eq!(application["opportunity_title"], "Food bank shift");
    let id = application["id"].as_str().unwrap();

    assert_eq!(
        app.queued(),
        vec![Notification::VolunteerApplication {
            application_id: id.to_string(),
            email: VolunteerEmail::Received,
        }]
    );

    let view = body_json(app.get(&format!("/api/volunteers/opportunities/{opportunity}")).await).await;
    assert_eq!(view["current_volunteers"], 1);
    assert_eq!(view["spots_remaining"], 1);
    assert_eq!(view["is_full"], false);
}

#[tokio::test]
async fn test_duplicate_and_overflow_applications_are_conflicts() {
    let app = setup().await;
    let opportunity = app.opportunity(1).await;

    assert_eq!(
        app.apply(&opportunity, "florence@example.org").await.status(),
        StatusCode::CREATED
    );

    let duplicate = app.apply(&opportunity, "florence@example.org").await;
    assert_eq!(duplicate.status(), StatusCode::CONFLICT);
    assert_eq!(body_json(duplicate).await["error_code"], "CONFLICT");

    let overflow = app.apply(&opportunity, "clara@example.org").await;
    assert_eq!(overflow.status(), StatusCode::CONFLICT);

    let view = body_json(app.get(&format!("/api/volunteers/opportunities/{opportunity}")).await).await;
    assert_eq!(view["current_volunteers"], 1);
    assert_eq!(view["is_full"], true);

    let missing = app
        .apply("00000000-0000-4000-8000-000000000000", "mary@example.org")
        .await;
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_concurrent_applications_never_overfill() {
    let app = setup().await;
    let opportunity = app.opportunity(3).await;
    let emails: Vec<String> = (0..8).map(|i| format!("v{i}@example.org")).collect();

    let responses = join_all(emails.iter().map(|email| app.apply(&opportunity, email))).await;
    let created = responses
        .iter()
        .filter(|r| r.status() == StatusCode::CREATED)
        .count();
    assert_eq!(created, 3);
    assert!(responses
        .iter()
        .all(|r| matches!(r.status(), StatusCode::CREATED | StatusCode::CONFLICT)));

    let stored = db::get_opportunity(app.pool(), &opportunity).await.unwrap().unwrap();
    assert_eq!(stored.current_volunteers, 3);
}

#[tokio::test]
async fn test_review_approves_once_and_rejection_frees_place() {
    let app = setup().await;
    let opportunity = app.opportunity(2).await;
    let first = body_json(app.apply(&opportunity, "florence@example.org").await).await;
    let second = body_json(app.apply(&opportunity, "clara@example.org").await).await;
    let first = first["id"].as_str().unwrap();
    let second = second["id"].as_str().unwrap();
    app.queued();

    let approved = app.review(first, "approved").await;
    assert_eq!(approved.status(), StatusCode::OK);
    let approved = body_json(approved).await;
    assert_eq!(approved["status"], "approved");
    assert_eq!(approved["reviewed_by"], "coordinator");
    assert_eq!(
        app.queued(),
        vec![Notification::VolunteerApplication {
            application_id: first.to_string(),
            email: VolunteerEmail::Approved,
        }]
    );

    let again = app.review(first, "rejected").await;
    assert_eq!(again.status(), StatusCode::CONFLICT);
    let details = body_json(again).await["details"].clone();
    assert_eq!(details["current_status"], "approved");
    assert!(app.queued().is_empty());

    assert_eq!(app.review(second, "rejected").await.status(), StatusCode::OK);
    let view = body_json(app.get(&format!("/api/volunteers/opportunities/{opportunity}")).await).await;
    assert_eq!(view["current_volunteers"], 1);
    assert!(app.queued().is_empty());
}

#[tokio::test]
async fn test_completed_opportunities_and_volunteer_stats() {
    let app = setup().await;
    let opportunity = app.opportunity(5).await;
    let application = body_json(app.apply(&opportunity, "florence@example.org").await).await;
    let id = application["id"].as_str().unwrap();

    let early = app
        .admin(
            Method::POST,
            &format!("/admin/volunteers/applications/{id}/hours"),
            Some(json!({ "date": "2025-02-01", "hours": "3.5", "description": "Packing" })),
        )
        .await;
    assert_eq!(early.status(), StatusCode::CONFLICT);

    app.review(id, "approved").await;
    for hours in ["3.5", "2.25"] {
        let resp = app
            .admin(
                Method::POST,
                &format!("/admin/volunteers/applications/{id}/hours"),
                Some(json!({ "date": "2025-02-01", "hours": hours, "description": "Packing" })),
            )
            .await;
        assert_eq!(resp.status(), StatusCode::CREATED);
    }
    let too_long = app
        .admin(
            Method::POST,
            &format!("/admin/volunteers/applications/{id}/hours"),
            Some(json!({ "date": "2025-02-02", "hours": "25", "description": "Packing" })),
        )
        .await;
    assert_eq!(too_long.status(), StatusCode::BAD_REQUEST);

    let resp = app
        .admin(
            Method::POST,
            &format!("/admin/volunteers/opportunities/{opportunity}/status"),
            Some(json!({ "status": "completed" })),
        )
        .await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(body_json(resp).await["end_date"].is_string());

    let active = body_json(app.get("/api/volunteers/opportunities").await).await;
    assert_eq!(active["count"], 0);
    let completed = body_json(app.get("/api/volunteers/opportunities/completed").await).await;
    assert_eq!(completed["count"], 1);

    let stats = body_json(app.admin(Method::GET, "/admin/volunteers/stats", None).await).await;
    assert_eq!(stats["total_volunteers"], 1);
    assert_eq!(stats["active_opportunities"], 0);
    assert_eq!(decimal(&stats["total_hours_logged"]), dec!(5.75));
    assert_eq!(stats["recent_applications"][0]["id"], id);
}

#[tokio::test]
async fn test_volunteer_application_validation() {
    let app = setup().await;
    let opportunity = app.opportunity(5).await;

    let bad_email = app.apply(&opportunity, "not-an-email").await;
    assert_eq!(bad_email.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(bad_email).await["error_code"], "VALIDATION_ERROR");

    let unauthenticated = app
        .post_json("/admin/volunteers/opportunities", json!({ "title": "x" }))
        .await;
    assert_eq!(unauthenticated.status(), StatusCode::UNAUTHORIZED);
    assert!(app.queued().is_empty());
}

// ─────────────────────────────────────────────────────────
// Contact messages
// ─────────────────────────────────────────────────────────

#[tokio::test]
async fn test_contact_message_follow_up() {
    let app = setup().await;

    let resp = app
        .post_json(
            "/api/contact",
            json!({
                "first_name": "Ada",
                "last_name": "Lovelace",
                "email": "ada@example.org",
                "subject": "Matching gifts",
                "message": "Does my employer's match count toward the campaign?",
                "message_type": "donation"
            }),
        )
        .await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    let id = body_json(resp).await["id"].as_str().unwrap().to_string();

    let inbox = body_json(
        app.admin(Method::GET, "/admin/contact/messages?status=new", None)
            .await,
    )
    .await;
    assert_eq!(inbox["count"], 1);
    assert_eq!(inbox["messages"][0]["full_name"], "Ada Lovelace");
    assert_eq!(inbox["messages"][0]["message_type"], "donation");

    let resp = app
        .admin(
            Method::POST,
            &format!("/admin/contact/messages/{id}"),
            Some(json!({
                "status": "resolved",
                "response_message": "Yes, it does.",
                "responded_by": "coordinator"
            })),
        )
        .await;
    assert_eq!(resp.status(), StatusCode::OK);
    let resolved = body_json(resp).await;
    assert_eq!(resolved["status"], "resolved");
    assert_eq!(resolved["responded_by"], "coordinator");
    assert!(resolved["responded_at"].is_string());

    let reopen = app
        .admin(
            Method::POST,
            &format!("/admin/contact/messages/{id}"),
            Some(json!({ "status": "new" })),
        )
        .await;
    assert_eq!(reopen.status(), StatusCode::CONFLICT);

    let inbox = body_json(
        app.admin(Method::GET, "/admin/contact/messages?status=new", None)
            .await,
    )
    .await;
    assert_eq!(inbox["count"], 0);
}

#[tokio::test]
async fn test_contact_form_validation_and_privacy() {
    let app = setup().await;

    let resp = app
        .post_json(
            "/api/contact",
            json!({
                "first_name": "Ada",
                "last_name": "Lovelace",
                "email": "ada@example.org",
                "subject": "",
                "message": "Hello"
            }),
        )
        .await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let listing = app.get("/admin/contact/messages").await;
    assert_eq!(listing.status(), StatusCode::UNAUTHORIZED);
}
