use crate::booking::{self, BookingPage};
use crate::domain::{self, Booking, PaymentEffect, PaymentProvider};
use crate::error::{ApiError, ApiResult};
use crate::models::*;
use crate::notify::RefundReason;
use crate::reconcile::{self, CallbackOutcome, PaymentNotice};
use crate::state::AppState;
use crate::sweep::SweepReport;
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::Redirect;
use axum::Json;
use chrono::{NaiveDate, Utc};
use std::collections::BTreeMap;
use tourbook_common::internal_auth::Caller;
use tourbook_paysig::momo;

const UNKNOWN_CLIENT_IP: &str = "0.0.0.0";

pub async fn health(State(state): State<AppState>) -> Json<HealthOut> {
    Json(HealthOut {
        status: "ok",
        env: state.env_name.clone(),
        service: "Tour Booking API",
        version: env!("CARGO_PKG_VERSION"),
        momo_enabled: state.gateways.is_enabled(PaymentProvider::Momo),
        vnpay_enabled: state.gateways.is_enabled(PaymentProvider::Vnpay),
    })
}

fn require_user(caller: &Caller) -> ApiResult<&str> {
    caller
        .user_id
        .as_deref()
        .ok_or_else(|| ApiError::unauthorized("user id required"))
}

/// First hop of `X-Forwarded-For`. VNPay only needs it for its own records.
fn client_ip(headers: &HeaderMap) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .unwrap_or(UNKNOWN_CLIENT_IP)
        .to_string()
}

pub async fn create_booking(
    State(state): State<AppState>,
    caller: Caller,
    headers: HeaderMap,
    Json(body): Json<CreateBookingReq>,
) -> ApiResult<(StatusCode, Json<BookingCreatedOut>)> {
    let user_id = require_user(&caller)?;
    let draft = body.into_draft(user_id)?;
    let created = booking::create_booking(&state, draft, &client_ip(&headers)).await?;
    Ok((StatusCode::CREATED, Json(created.into())))
}

pub async fn create_payment_url(
    State(state): State<AppState>,
    caller: Caller,
    Path(code): Path<String>,
    headers: HeaderMap,
    body: Option<Json<PaymentUrlReq>>,
) -> ApiResult<Json<BookingCreatedOut>> {
    let user_id = require_user(&caller)?;
    let body = body.map(|Json(b)| b).unwrap_or_default();
    let provider = parse_online_method(body.payment_method.as_deref())?;
    let created =
        booking::request_payment_url(&state, &code, user_id, provider, &client_ip(&headers))
            .await?;
    Ok(Json(created.into()))
}

pub async fn my_bookings(
    State(state): State<AppState>,
    caller: Caller,
    Query(params): Query<ListParams>,
) -> ApiResult<Json<BookingPage>> {
    let user_id = require_user(&caller)?;
    let page = booking::list_for_user(&state, user_id, params.page, params.limit).await?;
    Ok(Json(page))
}

pub async fn booking_detail(
    State(state): State<AppState>,
    caller: Caller,
    Path(code): Path<String>,
) -> ApiResult<Json<Booking>> {
    let user_id = require_user(&caller)?;
    Ok(Json(booking::booking_for_user(&state, &code, user_id).await?))
}

pub async fn cancel_booking(
    State(state): State<AppState>,
    caller: Caller,
    Path(code): Path<String>,
) -> ApiResult<Json<Booking>> {
    let user_id = require_user(&caller)?;
    Ok(Json(
        booking::cancel_booking_by_user(&state, &code, user_id).await?,
    ))
}

/// Generic payment notification for rails without their own callback
/// protocol (cash, bank transfer, COD). Only reachable by internal callers.
pub async fn payment_webhook(
    State(state): State<AppState>,
    Json(body): Json<PaymentWebhookReq>,
) -> ApiResult<Json<PaymentWebhookOut>> {
    let provider = PaymentProvider::parse(&body.provider)
        .ok_or_else(|| ApiError::bad_request("unknown provider"))?;
    let notice = PaymentNotice {
        code: body.code,
        provider,
        external_ref: body.reference,
        amount: body.amount,
    };
    let r = reconcile::apply_payment(state.store.as_ref(), &state.notifier, notice).await?;
    let (status, refund_required) = match r.effect {
        PaymentEffect::AlreadyProcessed => ("already_processed", false),
        PaymentEffect::Recorded { .. } => ("applied", false),
        PaymentEffect::CapacityConflict { .. } => ("capacity_conflict", true),
        PaymentEffect::CanceledBookingPaid => ("canceled_booking_paid", true),
    };
    Ok(Json(PaymentWebhookOut {
        status,
        refund_required,
        booking: r.booking,
    }))
}

pub async fn run_departure_sweep(
    State(state): State<AppState>,
    Query(params): Query<SweepParams>,
) -> ApiResult<Json<SweepReport>> {
    let reference = match params.date.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        Some(raw) => NaiveDate::parse_from_str(raw, "%Y-%m-%d")
            .map_err(|_| ApiError::bad_request("date must be YYYY-MM-DD"))?,
        None => Utc::now().date_naive(),
    };
    Ok(Json(state.sweep.run_once(reference).await?))
}

fn payment_redirect(state: &AppState, code: Option<&str>, failure: Option<&str>) -> Redirect {
    let mut q = url::form_urlencoded::Serializer::new(String::new());
    match failure {
        None => {
            q.append_pair("status", "success");
        }
        Some(reason) => {
            q.append_pair("status", "failed");
            q.append_pair("reason", reason);
        }
    }
    if let Some(code) = code.filter(|c| !c.is_empty()) {
        q.append_pair("code", code);
    }
    Redirect::to(&format!("{}/payment?{}", state.frontend_url, q.finish()))
}

fn redirect_for(state: &AppState, order_id: &str, outcome: &CallbackOutcome) -> Redirect {
    let code = domain::code_from_order_id(order_id);
    let failure: Option<String> = match outcome {
        CallbackOutcome::Applied(r) => r.refund_reason().map(|reason| {
            let tag = match reason {
                RefundReason::TourFull => "capacity_conflict",
                RefundReason::BookingCanceled => "canceled",
            };
            tag.to_string()
        }),
        CallbackOutcome::InvalidSignature => Some("invalid_sig".to_string()),
        CallbackOutcome::BookingNotFound => Some("notfound".to_string()),
        CallbackOutcome::PaymentFailed { code } => Some(code.clone()),
        CallbackOutcome::InvalidAmount => Some("invalid_amount".to_string()),
        CallbackOutcome::Malformed(_) => Some("invalid_request".to_string()),
        CallbackOutcome::Failed(_) => Some("server".to_string()),
    };
    payment_redirect(state, Some(code), failure.as_deref())
}

fn log_failed_outcome(provider: &'static str, outcome: &CallbackOutcome) {
    match outcome {
        CallbackOutcome::Failed(e) => {
            tracing::error!(provider, error = %e, "payment callback failed")
        }
        CallbackOutcome::Malformed(msg) => {
            tracing::warn!(provider, detail = %msg, "malformed payment callback")
        }
        CallbackOutcome::BookingNotFound => {
            tracing::error!(provider, "payment callback for unknown booking")
        }
        _ => {}
    }
}

/// Browser redirect after a MoMo payment. Carries the same signed fields as
/// the IPN, so it is reconciled the same way.
pub async fn momo_return(
    State(state): State<AppState>,
    Query(params): Query<BTreeMap<String, String>>,
) -> Redirect {
    let cb = serde_json::to_value(&params).and_then(serde_json::from_value::<momo::Callback>);
    let Ok(cb) = cb else {
        return payment_redirect(&state, None, Some("invalid_request"));
    };
    let outcome = reconcile::handle_momo_callback(&state, &cb).await;
    log_failed_outcome("momo", &outcome);
    redirect_for(&state, &cb.order_id, &outcome)
}

/// MoMo expects 204 once the notification is taken care of; anything else
/// makes it redeliver.
pub async fn momo_ipn(State(state): State<AppState>, body: Bytes) -> StatusCode {
    let Ok(cb) = serde_json::from_slice::<momo::Callback>(&body) else {
        tracing::warn!("momo ipn body is not valid json");
        return StatusCode::BAD_REQUEST;
    };
    let outcome = reconcile::handle_momo_callback(&state, &cb).await;
    log_failed_outcome("momo", &outcome);
    match outcome {
        CallbackOutcome::Applied(_)
        | CallbackOutcome::PaymentFailed { .. }
        | CallbackOutcome::BookingNotFound => StatusCode::NO_CONTENT,
        CallbackOutcome::InvalidSignature
        | CallbackOutcome::InvalidAmount
        | CallbackOutcome::Malformed(_) => StatusCode::BAD_REQUEST,
        CallbackOutcome::Failed(crate::error::BookingError::Storage(_)) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
        CallbackOutcome::Failed(_) => StatusCode::NO_CONTENT,
    }
}

pub async fn vnpay_return(
    State(state): State<AppState>,
    Query(params): Query<BTreeMap<String, String>>,
) -> Redirect {
    let outcome = reconcile::handle_vnpay_callback(&state, &params).await;
    log_failed_outcome("vnpay", &outcome);
    let order_id = params.get("vnp_TxnRef").map(String::as_str).unwrap_or("");
    redirect_for(&state, order_id, &outcome)
}

fn vnpay_ack(outcome: &CallbackOutcome) -> VnpayIpnOut {
    let (rsp_code, message) = match outcome {
        CallbackOutcome::Applied(_) | CallbackOutcome::PaymentFailed { .. } => {
            ("00", "Confirm Success")
        }
        CallbackOutcome::InvalidSignature => ("97", "Invalid signature"),
        CallbackOutcome::BookingNotFound => ("01", "Order not found"),
        CallbackOutcome::InvalidAmount => ("04", "Invalid amount"),
        CallbackOutcome::Malformed(_) | CallbackOutcome::Failed(_) => ("99", "Unknown error"),
    };
    VnpayIpnOut { rsp_code, message }
}

/// VNPay reads the JSON `RspCode`, never the HTTP status.
pub async fn vnpay_ipn(
    State(state): State<AppState>,
    Query(params): Query<BTreeMap<String, String>>,
) -> Json<VnpayIpnOut> {
    let outcome = reconcile::handle_vnpay_callback(&state, &params).await;
    log_failed_outcome("vnpay", &outcome);
    Json(vnpay_ack(&outcome))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::fixtures;
    use crate::gateway::tests::{momo_settings, vnpay_settings};
    use crate::reconcile::tests::{seed, signed_momo_callback, signed_vnpay_params};
    use crate::state::testing::{test_app, TestApp, FRONTEND};
    use axum::body::Body;
    use axum::http::{header, Request};
    use axum::Router;
    use tourbook_common::internal_auth::InternalAuthLayer;
    use tower::ServiceExt;

    const SECRET: &str = "internal-secret-0123456789";

    fn router(app: &TestApp) -> Router {
        let internal = InternalAuthLayer::new(true, Some(SECRET.to_string()))
            .with_allowed_callers(vec!["edge".to_string()]);
        crate::build_router(app.state.clone(), internal)
    }

    fn authed(method: &str, uri: &str, user: &str, body: Option<serde_json::Value>) -> Request<Body> {
        let builder = Request::builder()
            .method(method)
            .uri(uri)
            .header("x-internal-secret", SECRET)
            .header("x-internal-service-id", "edge")
            .header("x-user-id", user)
            .header("x-forwarded-for", "203.0.113.7, 10.0.0.1");
        match body {
            Some(v) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(v.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        }
    }

    async fn json_body(resp: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(resp.into_body(), 1 << 20)
            .await
            .expect("body");
        serde_json::from_slice(&bytes).expect("json")
    }

    fn location(resp: &axum::response::Response) -> String {
        resp.headers()
            .get(header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string()
    }

    #[test]
    fn client_ip_uses_first_forwarded_hop() {
        let mut h = HeaderMap::new();
        assert_eq!(client_ip(&h), "0.0.0.0");
        h.insert("x-forwarded-for", " 198.51.100.4 , 10.0.0.2".parse().unwrap());
        assert_eq!(client_ip(&h), "198.51.100.4");
    }

    #[tokio::test]
    async fn create_booking_returns_201_with_payment_error() {
        let app = test_app(None, None);
        app.store.put_tour(fixtures::tour(Some(10), 5, 0)).await;

        let resp = router(&app)
            .oneshot(authed(
                "POST",
                "/bookings",
                "user-1",
                Some(serde_json::json!({
                    "tour_id": "tour-halong",
                    "num_adults": 2,
                    "full_name": "Nguyen Van A",
                    "email": "a@example.com"
                })),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::CREATED);
        let v = json_body(resp).await;
        assert_eq!(v["amount_due"], 400);
        assert_eq!(v["payment_error"]["kind"], "disabled");
        assert_eq!(v["payment_error"]["retryable"], false);
        assert_eq!(v["booking"]["booking_status"], "p");
        assert!(v["pay_url"].is_null());
    }

    #[tokio::test]
    async fn create_booking_over_capacity_is_409_with_available() {
        let app = test_app(None, None);
        app.store.put_tour(fixtures::tour(Some(10), 5, 8)).await;
        let resp = router(&app)
            .oneshot(authed(
                "POST",
                "/bookings",
                "user-1",
                Some(serde_json::json!({
                    "tour_id": "tour-halong",
                    "num_adults": 3,
                    "full_name": "A",
                    "email": "a@example.com"
                })),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::CONFLICT);
        assert_eq!(json_body(resp).await["available"], 2);
    }

    #[tokio::test]
    async fn booking_routes_require_internal_auth_and_user() {
        let app = test_app(None, None);
        let resp = router(&app)
            .oneshot(
                Request::builder()
                    .uri("/bookings/me")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

        let resp = router(&app)
            .oneshot(authed("GET", "/bookings/me", "", None))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn detail_and_cancel_are_owner_only() {
        let app = test_app(None, None);
        let booking = seed(&app, None, 5, 0, 1).await;
        let uri = format!("/bookings/{}", booking.code);

        let resp = router(&app)
            .oneshot(authed("GET", &uri, "intruder", None))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        let resp = router(&app)
            .oneshot(authed("PUT", &format!("{uri}/cancel"), "user-1", None))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(json_body(resp).await["booking_status"], "x");

        let resp = router(&app)
            .oneshot(authed("PUT", &format!("{uri}/cancel"), "user-1", None))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn my_bookings_pages() {
        let app = test_app(None, None);
        seed(&app, None, 5, 0, 1).await;
        let resp = router(&app)
            .oneshot(authed("GET", "/bookings/me?page=1&limit=100", "user-1", None))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let v = json_body(resp).await;
        assert_eq!(v["total"], 1);
        assert_eq!(v["limit"], 50);
        assert_eq!(v["data"][0]["code"], "BKSEED01");
    }

    #[tokio::test]
    async fn webhook_is_idempotent_per_reference() {
        let app = test_app(None, None);
        let booking = seed(&app, None, 10, 0, 2).await;
        let body = serde_json::json!({
            "code": booking.code, "amount": 400, "provider": "manual", "ref": "cash-1"
        });

        let resp = router(&app)
            .oneshot(authed("POST", "/bookings/payment-webhook", "ops", Some(body.clone())))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(json_body(resp).await["status"], "applied");

        let resp = router(&app)
            .oneshot(authed("POST", "/bookings/payment-webhook", "ops", Some(body)))
            .await
            .unwrap();
        let v = json_body(resp).await;
        assert_eq!(v["status"], "already_processed");
        assert_eq!(v["booking"]["paid_amount"], 400);
    }

    #[tokio::test]
    async fn webhook_rejects_unknown_provider_and_booking() {
        let app = test_app(None, None);
        let resp = router(&app)
            .oneshot(authed(
                "POST",
                "/bookings/payment-webhook",
                "ops",
                Some(serde_json::json!({"code": "BKX", "amount": 1, "provider": "paypal", "ref": "r"})),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let resp = router(&app)
            .oneshot(authed(
                "POST",
                "/bookings/payment-webhook",
                "ops",
                Some(serde_json::json!({"code": "BKX", "amount": 1, "provider": "cod", "ref": "r"})),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn momo_ipn_acks_with_204_and_rejects_bad_signature() {
        let app = test_app(Some(momo_settings("http://unused")), None);
        let booking = seed(&app, None, 10, 0, 2).await;
        let cb = signed_momo_callback(&format!("{}-1", booking.code), "555", 400, 0);
        let body = serde_json::json!({
            "partnerCode": cb.partner_code,
            "orderId": cb.order_id,
            "requestId": cb.request_id,
            "amount": 400,
            "orderInfo": cb.order_info,
            "orderType": cb.order_type,
            "transId": 555,
            "resultCode": 0,
            "message": cb.message,
            "payType": cb.pay_type,
            "responseTime": 1733040000000i64,
            "extraData": cb.extra_data,
            "signature": cb.signature,
        });

        for _ in 0..2 {
            let resp = router(&app)
                .oneshot(
                    Request::builder()
                        .method("POST")
                        .uri("/payments/momo/ipn")
                        .header(header::CONTENT_TYPE, "application/json")
                        .body(Body::from(body.to_string()))
                        .unwrap(),
                )
                .await
                .unwrap();
            assert_eq!(resp.status(), StatusCode::NO_CONTENT);
        }
        assert_eq!(app.store.booking(&booking.code).await.expect("b").paid_amount, 400);

        let mut forged = body.clone();
        forged["amount"] = serde_json::json!(4);
        let resp = router(&app)
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/payments/momo/ipn")
                    .body(Body::from(forged.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn vnpay_ipn_speaks_rspcode() {
        let app = test_app(None, Some(vnpay_settings()));
        let booking = seed(&app, None, 10, 0, 2).await;
        let params = signed_vnpay_params(&format!("{}-1", booking.code), "9001", 400, "00");
        let qs = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(params.iter())
            .finish();

        let resp = router(&app)
            .oneshot(
                Request::builder()
                    .uri(format!("/payments/vnpay/ipn?{qs}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(json_body(resp).await["RspCode"], "00");

        let resp = router(&app)
            .oneshot(
                Request::builder()
                    .uri("/payments/vnpay/ipn?vnp_TxnRef=BKSEED01-1&vnp_SecureHash=00")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(json_body(resp).await["RspCode"], "97");

        let short = signed_vnpay_params(&format!("{}-2", booking.code), "9004", 1, "00");
        let qs = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(short.iter())
            .finish();
        let resp = get_uri(&app, &format!("/payments/vnpay/ipn?{qs}")).await;
        assert_eq!(json_body(resp).await["RspCode"], "04");
    }

    #[tokio::test]
    async fn vnpay_return_redirects_to_frontend() {
        let app = test_app(None, Some(vnpay_settings()));
        let booking = seed(&app, None, 10, 0, 2).await;
        let params = signed_vnpay_params(&format!("{}-1", booking.code), "9002", 400, "24");
        let qs = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(params.iter())
            .finish();

        let resp = router(&app)
            .oneshot(
                Request::builder()
                    .uri(format!("/payments/vnpay/return?{qs}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::SEE_OTHER);
        assert_eq!(
            location(&resp),
            format!("{FRONTEND}/payment?status=failed&reason=24&code=BKSEED01")
        );
    }

    #[tokio::test]
    async fn momo_return_success_redirect() {
        let app = test_app(Some(momo_settings("http://unused")), None);
        let booking = seed(&app, None, 10, 0, 2).await;
        let cb = signed_momo_callback(&format!("{}-77", booking.code), "777", 400, 0);
        let resp = get_uri(&app, &momo_return_uri(&cb)).await;
        assert_eq!(
            location(&resp),
            format!("{FRONTEND}/payment?status=success&code=BKSEED01")
        );
        assert_eq!(app.store.booking("BKSEED01").await.expect("b").paid_amount, 400);
    }

    fn momo_return_uri(cb: &momo::Callback) -> String {
        let qs = url::form_urlencoded::Serializer::new(String::new())
            .append_pair("partnerCode", &cb.partner_code)
            .append_pair("orderId", &cb.order_id)
            .append_pair("requestId", &cb.request_id)
            .append_pair("amount", &cb.amount)
            .append_pair("orderInfo", &cb.order_info)
            .append_pair("orderType", &cb.order_type)
            .append_pair("transId", &cb.trans_id)
            .append_pair("resultCode", &cb.result_code)
            .append_pair("message", &cb.message)
            .append_pair("payType", &cb.pay_type)
            .append_pair("responseTime", &cb.response_time)
            .append_pair("extraData", &cb.extra_data)
            .append_pair("signature", &cb.signature)
            .finish();
        format!("/payments/momo/return?{qs}")
    }

    async fn get_uri(app: &TestApp, uri: &str) -> axum::response::Response {
        router(app)
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn momo_return_on_full_tour_reports_capacity_conflict() {
        let app = test_app(Some(momo_settings("http://unused")), None);
        let booking = seed(&app, Some(4), 10, 2, 2).await;
        let mut full = app.store.tour("tour-halong").await.expect("tour");
        full.current_guests = 4;
        app.store.put_tour(full).await;

        let cb = signed_momo_callback(&format!("{}-78", booking.code), "778", 400, 0);
        let uri = momo_return_uri(&cb);
        let expected = format!("{FRONTEND}/payment?status=failed&reason=capacity_conflict&code=BKSEED01");

        let resp = get_uri(&app, &uri).await;
        assert_eq!(resp.status(), StatusCode::SEE_OTHER);
        assert_eq!(location(&resp), expected);
        // The browser may land after the IPN already recorded the payment.
        assert_eq!(location(&get_uri(&app, &uri).await), expected);

        let stored = app.store.booking("BKSEED01").await.expect("b");
        assert!(stored.capacity_conflict);
        assert_eq!(stored.paid_amount, 400);
        assert_eq!(app.mailer.subjects().len(), 1);
        assert!(app.mailer.subjects()[0].contains("refunded"));
    }

    #[tokio::test]
    async fn vnpay_return_on_canceled_booking_reports_canceled() {
        let app = test_app(None, Some(vnpay_settings()));
        let booking = seed(&app, None, 10, 0, 2).await;
        let resp = router(&app)
            .oneshot(authed("PUT", &format!("/bookings/{}/cancel", booking.code), "user-1", None))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let params = signed_vnpay_params(&format!("{}-2", booking.code), "9003", 400, "00");
        let qs = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(params.iter())
            .finish();
        let resp = get_uri(&app, &format!("/payments/vnpay/return?{qs}")).await;
        assert_eq!(
            location(&resp),
            format!("{FRONTEND}/payment?status=failed&reason=canceled&code=BKSEED01")
        );
        assert_eq!(app.store.booking("BKSEED01").await.expect("b").paid_amount, 400);
    }

    #[tokio::test]
    async fn create_booking_with_overflowing_party_is_400() {
        let app = test_app(None, None);
        app.store.put_tour(fixtures::tour(None, 5, 0)).await;
        let resp = router(&app)
            .oneshot(authed(
                "POST",
                "/bookings",
                "user-1",
                Some(serde_json::json!({
                    "tour_id": "tour-halong",
                    "num_adults": i32::MAX,
                    "num_children": 1,
                    "full_name": "A",
                    "email": "a@example.com"
                })),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn sweep_endpoint_validates_date() {
        let app = test_app(None, None);
        let resp = router(&app)
            .oneshot(authed("POST", "/internal/sweeps/departures?date=2025-13-01", "ops", None))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let resp = router(&app)
            .oneshot(authed("POST", "/internal/sweeps/departures?date=2025-11-30", "ops", None))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(json_body(resp).await["departure_date"], "2025-12-01");
    }

    #[tokio::test]
    async fn unknown_routes_return_404() {
        let app = test_app(None, None);
        let resp = router(&app)
            .oneshot(
                Request::builder()
                    .uri("/does_not_exist")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }
}
