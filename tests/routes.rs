use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use chrono::{Duration, Utc};
use enempro_backend::entitlements::{Plan, Role, Status, UsageCounter};
use enempro_backend::extractor::SessionUser;
use enempro_backend::store::{LeadDraft, LeadRecord, LeadStore, MemoryStore, UsageStore};
use enempro_backend::webhooks::SIGNATURE_HEADER;
use enempro_backend::{app, AppState};
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;

const SECRET: &str = "route-test-secret";

struct Harness {
    store: Arc<MemoryStore>,
    state: Arc<AppState>,
}

impl Harness {
    fn new() -> Self {
        let store = Arc::new(MemoryStore::new());
        let state = Arc::new(AppState::in_memory(store.clone(), SECRET));
        Self { store, state }
    }

    fn router(&self) -> Router {
        app(self.state.clone())
    }

    async fn lead(&self, email: &str, plan: Plan, status: Status, days_ago: i64) -> LeadRecord {
        self.store
            .insert_lead(LeadDraft {
                email: email.to_string(),
                name: None,
                phone: None,
                plan,
                status,
                purchase_price_cents: None,
                purchase_date: Utc::now() - Duration::days(days_ago),
            })
            .await
            .unwrap()
    }

    /// Weekly buyer whose row carries no status flag at all.
    async fn legacy_weekly_lead(&self, email: &str, days_ago: i64) {
        self.store
            .seed_lead(LeadRecord {
                id: Uuid::new_v4(),
                email: email.to_string(),
                name: None,
                phone: None,
                plan: Some("weekly".into()),
                status: None,
                purchase_date: Some((Utc::now() - Duration::days(days_ago)).to_rfc3339()),
                purchase_price_cents: Some(990),
                last_payment_date: None,
                created_at: Utc::now(),
            })
            .await;
    }

    fn bearer(&self, email: &str, role: Role) -> String {
        let token = self
            .state
            .session_keys
            .issue(
                &SessionUser {
                    email: email.to_string(),
                    role,
                },
                Utc::now(),
            )
            .unwrap();
        format!("Bearer {token}")
    }
}

async fn send(router: Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = router.oneshot(request).await.unwrap();
    let status = response.status();
    let body = hyper::body::to_bytes(response.into_body()).await.unwrap();
    let value = serde_json::from_slice(&body).unwrap_or(Value::Null);
    (status, value)
}

fn get(uri: &str, auth: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().uri(uri);
    if let Some(auth) = auth {
        builder = builder.header(header::AUTHORIZATION, auth);
    }
    builder.body(Body::empty()).unwrap()
}

fn post_json(uri: &str, auth: Option<&str>, body: Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(auth) = auth {
        builder = builder.header(header::AUTHORIZATION, auth);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

#[tokio::test]
async fn login_sets_session_cookie_and_me_reloads_principal() {
    let harness = Harness::new();
    harness
        .lead("aluno@example.com", Plan::Pro, Status::Active, 1)
        .await;

    let response = harness
        .router()
        .oneshot(post_json(
            "/api/login",
            None,
            json!({"email": "Aluno@Example.com"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let cookie = response
        .headers()
        .get(header::SET_COOKIE)
        .and_then(|value| value.to_str().ok())
        .unwrap()
        .split(';')
        .next()
        .unwrap()
        .to_string();
    assert!(cookie.starts_with("session_token="));

    let request = Request::builder()
        .uri("/api/me")
        .header(header::COOKIE, cookie)
        .body(Body::empty())
        .unwrap();
    let (status, me) = send(harness.router(), request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(me["email"], "aluno@example.com");
    assert_eq!(me["plan"], "pro");
}

#[tokio::test]
async fn login_distinguishes_unknown_and_blocked() {
    let harness = Harness::new();
    harness
        .lead("bloqueado@example.com", Plan::Pro, Status::Blocked, 1)
        .await;

    let (status, _) = send(
        harness.router(),
        post_json("/api/login", None, json!({"email": "ninguem@example.com"})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(
        harness.router(),
        post_json("/api/login", None, json!({"email": "bloqueado@example.com"})),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn access_decisions_are_reported_as_values() {
    let harness = Harness::new();
    harness.legacy_weekly_lead("start@example.com", 2).await;
    harness.legacy_weekly_lead("vencido@example.com", 10).await;

    let (status, body) = send(harness.router(), get("/api/access", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["decision"], "denied_no_session");

    let start = harness.bearer("start@example.com", Role::User);
    let (_, body) = send(
        harness.router(),
        get("/api/access?required=pro", Some(&start)),
    )
    .await;
    assert_eq!(body["decision"], "denied_insufficient_plan");
    assert_eq!(body["required"], "pro");

    let (_, body) = send(harness.router(), get("/api/access", Some(&start))).await;
    assert_eq!(body["decision"], "granted");

    let expired = harness.bearer("vencido@example.com", Role::User);
    let (_, body) = send(harness.router(), get("/api/access", Some(&expired))).await;
    assert_eq!(body["decision"], "denied_expired");

    let (status, _) = send(
        harness.router(),
        get("/api/access?required=gold", Some(&start)),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn consuming_past_quota_and_extra_returns_payment_required() {
    let harness = Harness::new();
    harness
        .lead("aluno@example.com", Plan::Weekly, Status::Active, 1)
        .await;
    harness
        .store
        .seed_usage("aluno@example.com", UsageCounter::new(1, 1));
    let auth = harness.bearer("aluno@example.com", Role::User);

    let (status, body) = send(
        harness.router(),
        post_json("/api/essays/consume", Some(&auth), json!({})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["source"], "quota");

    let (_, body) = send(
        harness.router(),
        post_json("/api/essays/consume", Some(&auth), json!({})),
    )
    .await;
    assert_eq!(body["source"], "extra");

    let (status, _) = send(
        harness.router(),
        post_json("/api/essays/consume", Some(&auth), json!({})),
    )
    .await;
    assert_eq!(status, StatusCode::PAYMENT_REQUIRED);

    let (_, usage) = send(harness.router(), get("/api/essays/usage", Some(&auth))).await;
    assert_eq!(usage["counter"]["essays_used_this_month"], 2);
    assert_eq!(usage["counter"]["extra_essay_balance"], 0);
    assert_eq!(usage["ceiling"], 2);
}

#[tokio::test]
async fn expired_weekly_plan_cannot_consume() {
    let harness = Harness::new();
    harness.legacy_weekly_lead("vencido@example.com", 9).await;
    let auth = harness.bearer("vencido@example.com", Role::User);
    let (status, _) = send(
        harness.router(),
        post_json("/api/essays/consume", Some(&auth), json!({})),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(
        harness.store.usage("vencido@example.com").await.unwrap(),
        UsageCounter::default()
    );
}

#[tokio::test]
async fn blocking_a_lead_revokes_its_open_session() {
    let harness = Harness::new();
    let lead = harness
        .lead("aluno@example.com", Plan::Pro, Status::Active, 1)
        .await;
    let auth = harness.bearer("aluno@example.com", Role::User);

    let (_, body) = send(
        harness.router(),
        get("/api/access?required=pro", Some(&auth)),
    )
    .await;
    assert_eq!(body["decision"], "granted");

    harness
        .store
        .set_status(lead.id, Status::Blocked)
        .await
        .unwrap();

    let (status, body) = send(
        harness.router(),
        get("/api/access?required=pro", Some(&auth)),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_ne!(body["decision"], "granted");

    let (status, _) = send(
        harness.router(),
        post_json("/api/essays/consume", Some(&auth), json!({})),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(
        harness.store.usage("aluno@example.com").await.unwrap(),
        UsageCounter::default()
    );

    let (status, _) = send(harness.router(), get("/api/me", Some(&auth))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn upgrade_quote_uses_pair_table() {
    let harness = Harness::new();
    let (status, body) = send(
        harness.router(),
        get("/api/upgrade-quote?current=start&target=advanced", None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["amount_cents"], 3500);
    assert_eq!(body["current"], "weekly");

    let (_, body) = send(
        harness.router(),
        get("/api/upgrade-quote?current=advanced&target=pro", None),
    )
    .await;
    assert_eq!(body["amount_cents"], 2990);
}

#[tokio::test]
async fn signed_webhook_credits_extra_essays_once() {
    let harness = Harness::new();
    let payload = json!({
        "event": "charge.paid",
        "data": {
            "id": "pix_char_abc",
            "amount": 998,
            "customer": {"email": "aluno@example.com"},
            "metadata": {"kind": "extra_essays", "quantity": 2}
        }
    })
    .to_string();
    let signature = harness
        .state
        .verifier
        .as_ref()
        .unwrap()
        .sign(payload.as_bytes());

    let signed = || {
        Request::builder()
            .method("POST")
            .uri("/api/webhooks/payments")
            .header(SIGNATURE_HEADER, signature.clone())
            .body(Body::from(payload.clone()))
            .unwrap()
    };

    let (status, body) = send(harness.router(), signed()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["settlement"], "applied");

    let (_, body) = send(harness.router(), signed()).await;
    assert_eq!(body["settlement"], "already_settled");
    assert_eq!(
        harness.store.usage("aluno@example.com").await.unwrap(),
        UsageCounter::new(0, 2)
    );

    let unsigned = Request::builder()
        .method("POST")
        .uri("/api/webhooks/payments")
        .body(Body::from(payload.clone()))
        .unwrap();
    let (status, _) = send(harness.router(), unsigned).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn admin_routes_require_admin_session() {
    let harness = Harness::new();
    harness
        .lead("vip@example.com", Plan::LifetimeMedicine, Status::Active, 1)
        .await;
    let user = harness.bearer("vip@example.com", Role::User);
    let forged = harness.bearer("vip@example.com", Role::Admin);
    let admin = harness.bearer("admin@enem.pro", Role::Admin);

    let (status, _) = send(harness.router(), get("/api/admin/leads", Some(&user))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, _) = send(harness.router(), get("/api/admin/leads", Some(&forged))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, _) = send(harness.router(), get("/api/admin/summary", None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, created) = send(
        harness.router(),
        post_json(
            "/api/admin/leads",
            Some(&admin),
            json!({"email": "nova@example.com", "name": "Nova", "plan": "advanced"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["purchase_price_cents"], 19990);

    let id = created["id"].as_str().unwrap().to_string();
    let (status, toggled) = send(
        harness.router(),
        post_json(
            &format!("/api/admin/leads/{id}/toggle-status"),
            Some(&admin),
            json!({}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(toggled["status"], "blocked");

    let (_, blocked) = send(
        harness.router(),
        get("/api/admin/leads?status=blocked", Some(&admin)),
    )
    .await;
    assert_eq!(blocked.as_array().unwrap().len(), 1);

    let (_, summary) = send(harness.router(), get("/api/admin/summary", Some(&admin))).await;
    assert_eq!(summary["total"], 2);
    assert_eq!(summary["blocked"], 1);
    assert_eq!(summary["active"], 1);
}
