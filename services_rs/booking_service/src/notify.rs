//! Customer notifications.
//!
//! Mail delivery is best effort. A failed send is logged and swallowed so that
//! it never turns a successful payment into a failed request.

use crate::domain::{Booking, Tour};
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Mail {
    pub to: String,
    pub subject: String,
    pub html: String,
}

#[derive(Debug, thiserror::Error)]
pub enum MailError {
    #[error("mail relay unreachable: {0}")]
    Transport(String),
    #[error("mail relay answered HTTP {0}")]
    Status(u16),
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, mail: &Mail) -> Result<(), MailError>;
}

/// Used when no relay is configured.
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, mail: &Mail) -> Result<(), MailError> {
        tracing::info!(to = %mail.to, subject = %mail.subject, "mail (log only)");
        Ok(())
    }
}

/// Posts `{to, subject, html}` as JSON to an internal mail relay.
pub struct HttpMailer {
    http: reqwest::Client,
    url: String,
    secret: Option<String>,
}

impl HttpMailer {
    pub fn new(http: reqwest::Client, url: String, secret: Option<String>) -> Self {
        Self { http, url, secret }
    }
}

#[async_trait]
impl Mailer for HttpMailer {
    async fn send(&self, mail: &Mail) -> Result<(), MailError> {
        let mut req = self.http.post(&self.url).json(mail);
        if let Some(secret) = self.secret.as_deref() {
            req = req.header("X-Internal-Secret", secret);
        }
        let resp = req
            .send()
            .await
            .map_err(|e| MailError::Transport(e.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(MailError::Status(status.as_u16()));
        }
        Ok(())
    }
}

/// `1600000` -> `1.600.000 VND`
pub fn format_vnd(amount: i64) -> String {
    let digits = amount.unsigned_abs().to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push('.');
        }
        grouped.push(ch);
    }
    if amount < 0 {
        format!("-{grouped} VND")
    } else {
        format!("{grouped} VND")
    }
}

fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(ch),
        }
    }
    out
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefundReason {
    TourFull,
    BookingCanceled,
}

#[derive(Clone)]
pub struct Notifier {
    mailer: Arc<dyn Mailer>,
    frontend_url: String,
}

impl Notifier {
    pub fn new(mailer: Arc<dyn Mailer>, frontend_url: impl Into<String>) -> Self {
        Self {
            mailer,
            frontend_url: frontend_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn pay_remaining_link(&self, booking: &Booking) -> String {
        let query = url::form_urlencoded::Serializer::new(String::new())
            .append_pair("code", &booking.code)
            .append_pair("amount", &booking.remaining_balance().to_string())
            .finish();
        format!("{}/pay-remaining?{query}", self.frontend_url)
    }

    fn greeting(booking: &Booking) -> String {
        let name = booking
            .contact
            .full_name
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or("there");
        format!("<p>Hello {},</p>", escape_html(name))
    }

    pub async fn deposit_received(&self, booking: &Booking) {
        let subject = format!("[{}] Payment received", booking.code);
        let html = format!(
            "{}<p>We received your payment for booking <b>{}</b>.</p>\
             <p>Paid so far: {} of {}. Remaining: {}.</p>\
             <p>Your seats are held. We will let you know when the tour is confirmed.</p>",
            Self::greeting(booking),
            booking.code,
            format_vnd(booking.paid_amount),
            format_vnd(booking.total_price),
            format_vnd(booking.remaining_balance()),
        );
        self.deliver(booking, "deposit_received", subject, html).await;
    }

    pub async fn fully_paid(&self, booking: &Booking) {
        let subject = format!("[{}] Booking fully paid", booking.code);
        let html = format!(
            "{}<p>Booking <b>{}</b> is fully paid ({}). See you on the tour!</p>",
            Self::greeting(booking),
            booking.code,
            format_vnd(booking.total_price),
        );
        self.deliver(booking, "fully_paid", subject, html).await;
    }

    pub async fn tour_confirmed(&self, tour: &Tour, booking: &Booking) {
        let subject = format!("[{}] Tour {} is confirmed", booking.code, tour.title);
        let html = format!(
            "{}<p>The tour <b>{}</b> departing {} has reached its minimum group size and is confirmed.</p>\
             <p>Remaining balance: <b>{}</b>. <a href=\"{}\">Pay the remaining balance</a>.</p>",
            Self::greeting(booking),
            escape_html(&tour.title),
            tour.start_date.format("%d/%m/%Y"),
            format_vnd(booking.remaining_balance()),
            escape_html(&self.pay_remaining_link(booking)),
        );
        self.deliver(booking, "tour_confirmed", subject, html).await;
    }

    pub async fn balance_reminder(&self, tour: &Tour, booking: &Booking) {
        let subject = format!("[{}] Please settle your balance before departure", booking.code);
        let html = format!(
            "{}<p>The tour <b>{}</b> departs on {}.</p>\
             <p>Remaining balance: <b>{}</b>. <a href=\"{}\">Pay now</a>.</p>",
            Self::greeting(booking),
            escape_html(&tour.title),
            tour.start_date.format("%d/%m/%Y"),
            format_vnd(booking.remaining_balance()),
            escape_html(&self.pay_remaining_link(booking)),
        );
        self.deliver(booking, "balance_reminder", subject, html).await;
    }

    pub async fn not_enough_guests(&self, tour: &Tour, booking: &Booking) {
        let subject = format!("[{}] Tour {} did not reach its group size", booking.code, tour.title);
        let html = format!(
            "{}<p>Unfortunately the tour <b>{}</b> departing {} did not reach the minimum of {} guests \
             ({} registered).</p>\
             <p>You can request a refund of the {} you paid or transfer your booking to another \
             departure. Reply to this email with booking code <b>{}</b>.</p>",
            Self::greeting(booking),
            escape_html(&tour.title),
            tour.start_date.format("%d/%m/%Y"),
            tour.min_guests,
            tour.current_guests,
            format_vnd(booking.paid_amount),
            booking.code,
        );
        self.deliver(booking, "not_enough_guests", subject, html).await;
    }

    /// Money was taken but the booking cannot use it: the tour filled up
    /// before the first deposit landed, or the booking was already canceled.
    pub async fn refund_required(&self, booking: &Booking, reason: RefundReason) {
        let subject = format!("[{}] Your payment will be refunded", booking.code);
        let why = match reason {
            RefundReason::TourFull => "the tour ran out of seats before your deposit arrived",
            RefundReason::BookingCanceled => "the booking had already been canceled",
        };
        let html = format!(
            "{}<p>We received {} for booking <b>{}</b>, but {}.</p>\
             <p>Our team will refund the full amount. Reply to this email if you would rather \
             move to another departure.</p>",
            Self::greeting(booking),
            format_vnd(booking.paid_amount),
            booking.code,
            why,
        );
        self.deliver(booking, "refund_required", subject, html).await;
    }

    async fn deliver(&self, booking: &Booking, kind: &'static str, subject: String, html: String) {
        let Some(to) = booking
            .contact
            .email
            .as_deref()
            .map(str::trim)
            .filter(|s| s.contains('@'))
        else {
            tracing::warn!(code = %booking.code, kind, "no contact email; notification skipped");
            return;
        };
        let mail = Mail {
            to: to.to_string(),
            subject,
            html,
        };
        match self.mailer.send(&mail).await {
            Ok(()) => tracing::info!(code = %booking.code, kind, "notification sent"),
            Err(e) => {
                tracing::error!(code = %booking.code, kind, error = %e, "notification failed")
            }
        }
    }
}
