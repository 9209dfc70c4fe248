//! Outbound payment-link creation for MoMo and VNPay.
//!
//! Failures are returned as [`GatewayError`] values, never as request
//! failures: by the time a link is requested the booking already exists.

use crate::config::{MomoSettings, VnpaySettings};
use crate::domain::{self, PaymentProvider};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tourbook_paysig::{momo, vnpay};

/// VNPay expects local Vietnam time (GMT+7) in its date fields.
const VN_UTC_OFFSET_HOURS: i64 = 7;
const VNPAY_LINK_TTL_MINUTES: i64 = 15;
const MAX_RAW_BODY_LEN: usize = 2048;

#[derive(Debug, Clone, thiserror::Error)]
pub enum GatewayError {
    #[error("{0} payments are not configured")]
    Disabled(&'static str),
    #[error("{0} payments do not use a payment link")]
    Unsupported(&'static str),
    #[error("invalid payment request: {0}")]
    InvalidRequest(String),
    #[error("payment gateway timed out")]
    Timeout,
    #[error("payment gateway unreachable: {0}")]
    Transport(String),
    #[error("payment gateway answered HTTP {status}")]
    Http { status: u16, raw: Option<String> },
    #[error("payment gateway rejected the request (code {code:?}): {message}")]
    Rejected {
        code: Option<i64>,
        message: String,
        raw: Option<serde_json::Value>,
    },
    #[error("invalid payment gateway response: {0}")]
    InvalidResponse(String),
}

impl GatewayError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Disabled(_) => "disabled",
            Self::Unsupported(_) => "unsupported",
            Self::InvalidRequest(_) => "invalid_request",
            Self::Timeout => "timeout",
            Self::Transport(_) => "transport",
            Self::Http { .. } => "http",
            Self::Rejected { .. } => "rejected",
            Self::InvalidResponse(_) => "invalid_response",
        }
    }

    /// Whether asking again later might succeed.
    pub fn retryable(&self) -> bool {
        match self {
            Self::Timeout | Self::Transport(_) => true,
            Self::Http { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }
}

fn map_transport(e: reqwest::Error) -> GatewayError {
    if e.is_timeout() {
        GatewayError::Timeout
    } else {
        GatewayError::Transport(e.to_string())
    }
}

fn truncate_raw(body: &str) -> String {
    if body.len() <= MAX_RAW_BODY_LEN {
        return body.to_string();
    }
    let mut end = MAX_RAW_BODY_LEN;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    body[..end].to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PaymentLink {
    pub provider: PaymentProvider,
    pub order_id: String,
    pub amount: i64,
    pub pay_url: String,
    pub deeplink: Option<String>,
    pub qr_code_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct PaymentRequest<'a> {
    pub provider: PaymentProvider,
    pub booking_code: &'a str,
    pub amount: i64,
    pub order_info: String,
    pub client_ip: &'a str,
}

pub struct GatewayClient {
    http: reqwest::Client,
    momo: Option<MomoSettings>,
    vnpay: Option<VnpaySettings>,
}

impl GatewayClient {
    /// `http` should carry the bounded gateway timeout.
    pub fn new(
        http: reqwest::Client,
        momo: Option<MomoSettings>,
        vnpay: Option<VnpaySettings>,
    ) -> Self {
        Self { http, momo, vnpay }
    }

    pub fn momo_credentials(&self) -> Option<momo::MomoCredentials> {
        self.momo.as_ref().map(|m| momo::MomoCredentials {
            partner_code: m.partner_code.clone(),
            access_key: m.access_key.clone(),
            secret_key: m.secret_key.clone(),
        })
    }

    pub fn vnpay_hash_secret(&self) -> Option<&str> {
        self.vnpay.as_ref().map(|v| v.hash_secret.as_str())
    }

    pub fn is_enabled(&self, provider: PaymentProvider) -> bool {
        match provider {
            PaymentProvider::Momo => self.momo.is_some(),
            PaymentProvider::Vnpay => self.vnpay.is_some(),
            _ => false,
        }
    }

    pub async fn create_payment(&self, req: &PaymentRequest<'_>) -> Result<PaymentLink, GatewayError> {
        if req.amount <= 0 {
            return Err(GatewayError::InvalidRequest(
                "amount must be a positive integer".to_string(),
            ));
        }
        let now = Utc::now();
        let order_id = domain::payment_order_id(req.booking_code, now);
        match req.provider {
            PaymentProvider::Momo => self.create_momo(req, order_id).await,
            PaymentProvider::Vnpay => self.create_vnpay(req, order_id, now),
            other => Err(GatewayError::Unsupported(other.as_str())),
        }
    }

    async fn create_momo(
        &self,
        req: &PaymentRequest<'_>,
        order_id: String,
    ) -> Result<PaymentLink, GatewayError> {
        let settings = self.momo.as_ref().ok_or(GatewayError::Disabled("momo"))?;
        let creds = momo::MomoCredentials {
            partner_code: settings.partner_code.clone(),
            access_key: settings.access_key.clone(),
            secret_key: settings.secret_key.clone(),
        };
        let body = momo::CreatePaymentRequest {
            request_id: order_id.clone(),
            order_id: order_id.clone(),
            amount: req.amount,
            order_info: req.order_info.clone(),
            redirect_url: settings.redirect_url.clone(),
            ipn_url: settings.ipn_url.clone(),
            request_type: settings.request_type.clone(),
            extra_data: String::new(),
            lang: "vi".to_string(),
        }
        .into_signed_body(&creds)
        .map_err(|e| GatewayError::InvalidRequest(e.to_string()))?;

        let resp = self
            .http
            .post(&settings.api_url)
            .json(&body)
            .send()
            .await
            .map_err(map_transport)?;
        let status = resp.status();
        let text = resp.text().await.map_err(map_transport)?;
        let parsed = serde_json::from_str::<momo::CreatePaymentResponse>(&text);

        if !status.is_success() {
            // MoMo reports business errors with a 4xx and a resultCode body.
            if let Ok(r) = &parsed {
                if r.result_code.is_some() {
                    return Err(GatewayError::Rejected {
                        code: r.result_code,
                        message: r.message.clone().unwrap_or_default(),
                        raw: serde_json::from_str(&text).ok(),
                    });
                }
            }
            tracing::warn!(status = status.as_u16(), order_id = %order_id, "momo create http error");
            return Err(GatewayError::Http {
                status: status.as_u16(),
                raw: Some(truncate_raw(&text)).filter(|s| !s.is_empty()),
            });
        }

        let parsed = parsed.map_err(|e| GatewayError::InvalidResponse(e.to_string()))?;
        if !parsed.is_success() {
            tracing::warn!(
                order_id = %order_id,
                result_code = ?parsed.result_code,
                "momo create rejected"
            );
            return Err(GatewayError::Rejected {
                code: parsed.result_code,
                message: parsed.message.clone().unwrap_or_default(),
                raw: serde_json::from_str(&text).ok(),
            });
        }
        let pay_url = parsed
            .pay_url
            .filter(|u| !u.trim().is_empty())
            .ok_or_else(|| GatewayError::InvalidResponse("payUrl missing".to_string()))?;

        Ok(PaymentLink {
            provider: PaymentProvider::Momo,
            order_id,
            amount: req.amount,
            pay_url,
            deeplink: parsed.deeplink.filter(|s| !s.is_empty()),
            qr_code_url: parsed.qr_code_url.filter(|s| !s.is_empty()),
        })
    }

    fn create_vnpay(
        &self,
        req: &PaymentRequest<'_>,
        order_id: String,
        now: DateTime<Utc>,
    ) -> Result<PaymentLink, GatewayError> {
        let settings = self.vnpay.as_ref().ok_or(GatewayError::Disabled("vnpay"))?;
        let local_now = (now + Duration::hours(VN_UTC_OFFSET_HOURS)).naive_utc();
        let params = vnpay::PayUrlParams {
            tmn_code: settings.tmn_code.clone(),
            amount: req.amount,
            txn_ref: order_id.clone(),
            order_info: req.order_info.clone(),
            order_type: "other".to_string(),
            return_url: settings.return_url.clone(),
            ip_addr: req.client_ip.to_string(),
            locale: "vn".to_string(),
            create_date: local_now,
            expire_date: Some(local_now + Duration::minutes(VNPAY_LINK_TTL_MINUTES)),
        };
        let pay_url = params
            .build_url(&settings.pay_url, &settings.hash_secret)
            .map_err(|e| GatewayError::InvalidRequest(e.to_string()))?;
        Ok(PaymentLink {
            provider: PaymentProvider::Vnpay,
            order_id,
            amount: req.amount,
            pay_url,
            deeplink: None,
            qr_code_url: None,
        })
    }
}
