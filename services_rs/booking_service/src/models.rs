use crate::booking::CreatedBooking;
use crate::domain::{Booking, BookingDraft, Contact, Party, PaymentProvider};
use crate::error::BookingError;
use crate::gateway::GatewayError;
use serde::{Deserialize, Serialize};

fn default_adults() -> i32 {
    1
}

fn clean(raw: Option<String>) -> Option<String> {
    raw.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

#[derive(Debug, Deserialize)]
pub struct CreateBookingReq {
    pub tour_id: String,
    #[serde(default = "default_adults")]
    pub num_adults: i32,
    #[serde(default)]
    pub num_children: i32,
    pub full_name: Option<String>,
    pub email: Option<String>,
    pub phone_number: Option<String>,
    pub address: Option<String>,
    pub payment_method: Option<String>,
    pub note: Option<String>,
}

/// Only gateways that hand out a payment link can be chosen by customers.
pub fn parse_online_method(raw: Option<&str>) -> Result<Option<PaymentProvider>, BookingError> {
    let Some(raw) = raw.map(str::trim).filter(|s| !s.is_empty()) else {
        return Ok(None);
    };
    match PaymentProvider::parse(raw) {
        Some(p) if p.is_online() => Ok(Some(p)),
        _ => Err(BookingError::Validation(
            "payment_method must be momo or vnpay".to_string(),
        )),
    }
}

impl CreateBookingReq {
    pub fn into_draft(self, user_id: &str) -> Result<BookingDraft, BookingError> {
        let tour_id = self.tour_id.trim().to_string();
        if tour_id.is_empty() {
            return Err(BookingError::Validation("tour_id is required".to_string()));
        }
        let party = Party::new(self.num_adults, self.num_children)?;
        let payment_method =
            parse_online_method(self.payment_method.as_deref())?.unwrap_or(PaymentProvider::Momo);

        let full_name = clean(self.full_name)
            .ok_or_else(|| BookingError::Validation("full_name is required".to_string()))?;
        let email = clean(self.email)
            .filter(|e| e.contains('@'))
            .ok_or_else(|| BookingError::Validation("a valid email is required".to_string()))?;

        Ok(BookingDraft {
            tour_id,
            user_id: user_id.to_string(),
            contact: Contact {
                full_name: Some(full_name),
                email: Some(email),
                phone_number: clean(self.phone_number),
                address: clean(self.address),
            },
            party,
            payment_method,
            note: clean(self.note),
        })
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct PaymentUrlReq {
    pub payment_method: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct PaymentErrorOut {
    pub kind: &'static str,
    pub message: String,
    pub retryable: bool,
}

impl From<&GatewayError> for PaymentErrorOut {
    fn from(e: &GatewayError) -> Self {
        Self {
            kind: e.kind(),
            message: e.to_string(),
            retryable: e.retryable(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct BookingCreatedOut {
    pub booking: Booking,
    pub amount_due: i64,
    pub pay_url: Option<String>,
    pub deeplink: Option<String>,
    pub qr_code_url: Option<String>,
    pub payment_error: Option<PaymentErrorOut>,
}

impl From<CreatedBooking> for BookingCreatedOut {
    fn from(c: CreatedBooking) -> Self {
        let amount_due = c.booking.amount_due();
        match c.payment {
            Ok(link) => Self {
                booking: c.booking,
                amount_due,
                pay_url: Some(link.pay_url),
                deeplink: link.deeplink,
                qr_code_url: link.qr_code_url,
                payment_error: None,
            },
            Err(e) => Self {
                booking: c.booking,
                amount_due,
                pay_url: None,
                deeplink: None,
                qr_code_url: None,
                payment_error: Some(PaymentErrorOut::from(&e)),
            },
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ListParams {
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct PaymentWebhookReq {
    pub code: String,
    pub amount: i64,
    pub provider: String,
    #[serde(rename = "ref")]
    pub reference: String,
}

#[derive(Debug, Serialize)]
pub struct PaymentWebhookOut {
    pub status: &'static str,
    pub refund_required: bool,
    pub booking: Booking,
}

#[derive(Debug, Deserialize)]
pub struct SweepParams {
    pub date: Option<String>,
}

#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct VnpayIpnOut {
    #[serde(rename = "RspCode")]
    pub rsp_code: &'static str,
    #[serde(rename = "Message")]
    pub message: &'static str,
}

#[derive(Debug, Serialize)]
pub struct HealthOut {
    pub status: &'static str,
    pub env: String,
    pub service: &'static str,
    pub version: &'static str,
    pub momo_enabled: bool,
    pub vnpay_enabled: bool,
}
