//! Booking creation and the customer-facing booking operations.

use crate::domain::{self, Booking, BookingDraft, BookingStatus, PaymentProvider, Tour};
use crate::error::BookingError;
use crate::gateway::{GatewayError, PaymentLink, PaymentRequest};
use crate::state::AppState;
use serde::Serialize;

pub const MAX_PAGE_SIZE: i64 = 50;
pub const DEFAULT_PAGE_SIZE: i64 = 10;

/// A persisted booking plus the outcome of asking the gateway for a link.
/// The booking exists either way.
#[derive(Debug)]
pub struct CreatedBooking {
    pub booking: Booking,
    pub payment: Result<PaymentLink, GatewayError>,
}

#[derive(Debug, Serialize)]
pub struct BookingPage {
    pub total: i64,
    pub page: i64,
    pub limit: i64,
    pub data: Vec<Booking>,
}

fn order_info(tour_title: &str, booking: &Booking) -> String {
    let title = tour_title.trim();
    if booking.deposit_paid {
        format!("Thanh toan con lai tour {title} - {}", booking.code)
    } else if booking.deposit_amount >= booking.total_price {
        format!("Thanh toan tour {title} - {}", booking.code)
    } else {
        format!("Dat coc tour {title} - {}", booking.code)
    }
}

async fn request_link(
    state: &AppState,
    tour_title: &str,
    booking: &Booking,
    provider: PaymentProvider,
    client_ip: &str,
) -> Result<PaymentLink, GatewayError> {
    let req = PaymentRequest {
        provider,
        booking_code: &booking.code,
        amount: booking.amount_due(),
        order_info: order_info(tour_title, booking),
        client_ip,
    };
    let res = state.gateways.create_payment(&req).await;
    match &res {
        Ok(link) => tracing::info!(
            code = %booking.code,
            provider = provider.as_str(),
            order_id = %link.order_id,
            amount = link.amount,
            "payment link created"
        ),
        Err(e) => tracing::warn!(
            code = %booking.code,
            provider = provider.as_str(),
            kind = e.kind(),
            retryable = e.retryable(),
            error = %e,
            "payment link failed"
        ),
    }
    res
}

/// Persists the booking first and only then talks to the gateway, so a
/// gateway failure never loses the booking.
pub async fn create_booking(
    state: &AppState,
    draft: BookingDraft,
    client_ip: &str,
) -> Result<CreatedBooking, BookingError> {
    let (booking, tour) = state.store.create_booking(&draft, state.deposit_rate).await?;
    tracing::info!(
        code = %booking.code,
        tour_id = %booking.tour_id,
        party_size = booking.party_size(),
        total_price = booking.total_price,
        deposit_amount = booking.deposit_amount,
        "booking created"
    );
    let payment = request_link(state, &tour.title, &booking, booking.payment_method, client_ip).await;
    Ok(CreatedBooking { booking, payment })
}

/// Fresh link for whatever is due now: the deposit, or the remaining balance
/// once a deposit is in.
pub async fn request_payment_url(
    state: &AppState,
    code: &str,
    user_id: &str,
    provider: Option<PaymentProvider>,
    client_ip: &str,
) -> Result<CreatedBooking, BookingError> {
    let booking = booking_for_user(state, code, user_id).await?;
    if booking.booking_status == BookingStatus::Canceled {
        return Err(BookingError::Validation("booking is canceled".to_string()));
    }
    if booking.amount_due() <= 0 {
        return Err(BookingError::NothingDue);
    }
    let provider = provider.unwrap_or(booking.payment_method);
    let title = state
        .store
        .find_tour(&booking.tour_id)
        .await?
        .map(|t: Tour| t.title)
        .unwrap_or_default();
    let payment = request_link(state, &title, &booking, provider, client_ip).await;
    Ok(CreatedBooking { booking, payment })
}

pub async fn cancel_booking_by_user(
    state: &AppState,
    code: &str,
    user_id: &str,
) -> Result<Booking, BookingError> {
    let booking = state.store.cancel_booking(code.trim(), user_id).await?;
    tracing::info!(code = %booking.code, user_id, "booking canceled by user");
    Ok(booking)
}

/// Bookings of other users are reported as missing.
pub async fn booking_for_user(
    state: &AppState,
    code: &str,
    user_id: &str,
) -> Result<Booking, BookingError> {
    let code = code.trim();
    if !domain::is_valid_code(code) {
        return Err(BookingError::BookingNotFound);
    }
    state
        .store
        .find_booking(code)
        .await?
        .filter(|b| b.is_owned_by(user_id))
        .ok_or(BookingError::BookingNotFound)
}

pub async fn list_for_user(
    state: &AppState,
    user_id: &str,
    page: Option<i64>,
    limit: Option<i64>,
) -> Result<BookingPage, BookingError> {
    let page = page.unwrap_or(1).max(1);
    let limit = limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);
    let offset = (page - 1).saturating_mul(limit);
    let (data, total) = state.store.list_user_bookings(user_id, offset, limit).await?;
    Ok(BookingPage {
        total,
        page,
        limit,
        data,
    })
}
