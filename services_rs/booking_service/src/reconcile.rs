//! Applies verified payments to bookings.
//!
//! Gateways redeliver callbacks freely, so everything here must be safe to
//! run any number of times for the same `(provider, external_ref)`. The store
//! guarantees that per booking; this module decides what to tell people.

use crate::coordinator;
use crate::domain::{self, Booking, BookingStatus, PaymentEffect, PaymentProvider, PaymentRef};
use crate::error::BookingError;
use crate::notify::{Notifier, RefundReason};
use crate::state::AppState;
use crate::store::Store;
use chrono::Utc;
use std::collections::BTreeMap;
use tourbook_paysig::{momo, vnpay, SignatureError};

#[derive(Debug, Clone)]
pub struct PaymentNotice {
    pub code: String,
    pub provider: PaymentProvider,
    pub external_ref: String,
    pub amount: i64,
}

#[derive(Debug, Clone)]
pub struct Reconciled {
    pub booking: Booking,
    pub effect: PaymentEffect,
}

impl Reconciled {
    /// Read from the booking rather than the effect so a redelivered callback
    /// reports the same thing as the first one.
    pub fn refund_reason(&self) -> Option<RefundReason> {
        if self.booking.capacity_conflict {
            Some(RefundReason::TourFull)
        } else if self.booking.booking_status == BookingStatus::Canceled {
            Some(RefundReason::BookingCanceled)
        } else {
            None
        }
    }
}

pub async fn apply_payment(
    store: &dyn Store,
    notifier: &Notifier,
    notice: PaymentNotice,
) -> Result<Reconciled, BookingError> {
    let payment = PaymentRef {
        provider: notice.provider,
        external_ref: notice.external_ref.clone(),
        amount: notice.amount,
        at: Utc::now(),
    };
    let (booking, effect) = store.settle_payment(notice.code.trim(), payment).await?;

    match effect {
        PaymentEffect::AlreadyProcessed => {
            tracing::info!(
                code = %booking.code,
                provider = notice.provider.as_str(),
                external_ref = %notice.external_ref,
                "payment already processed"
            );
        }
        PaymentEffect::Recorded {
            first_deposit,
            fully_paid,
        } => {
            tracing::info!(
                code = %booking.code,
                provider = notice.provider.as_str(),
                external_ref = %notice.external_ref,
                amount = notice.amount,
                paid_amount = booking.paid_amount,
                total_price = booking.total_price,
                first_deposit,
                fully_paid,
                "payment applied"
            );
            if first_deposit && !fully_paid {
                notifier.deposit_received(&booking).await;
            }
            if fully_paid {
                notifier.fully_paid(&booking).await;
            }
            if first_deposit {
                // The payment is already committed; a failed promotion is
                // retried by the next deposit or the daily sweep.
                if let Err(e) =
                    coordinator::maybe_confirm_tour(store, notifier, &booking.tour_id).await
                {
                    tracing::error!(tour_id = %booking.tour_id, error = %e, "tour confirmation failed");
                }
            }
        }
        PaymentEffect::CapacityConflict { available } => {
            tracing::error!(
                code = %booking.code,
                tour_id = %booking.tour_id,
                party_size = booking.party_size(),
                available,
                paid_amount = booking.paid_amount,
                "deposit received but tour is full; refund required"
            );
            notifier.refund_required(&booking, RefundReason::TourFull).await;
        }
        PaymentEffect::CanceledBookingPaid => {
            tracing::warn!(
                code = %booking.code,
                provider = notice.provider.as_str(),
                external_ref = %notice.external_ref,
                amount = notice.amount,
                "payment received for canceled booking; refund required"
            );
            notifier
                .refund_required(&booking, RefundReason::BookingCanceled)
                .await;
        }
    }

    Ok(Reconciled { booking, effect })
}

/// Result of handling one gateway callback, before it is rendered in the
/// gateway's own response protocol.
#[derive(Debug)]
pub enum CallbackOutcome {
    Applied(Reconciled),
    InvalidSignature,
    InvalidAmount,
    Malformed(String),
    /// The gateway reports the customer did not pay.
    PaymentFailed { code: String },
    BookingNotFound,
    Failed(BookingError),
}

async fn settle_callback(state: &AppState, notice: PaymentNotice) -> CallbackOutcome {
    if notice.amount <= 0 {
        tracing::warn!(code = %notice.code, amount = notice.amount, "callback with non-positive amount");
        return CallbackOutcome::InvalidAmount;
    }
    match apply_payment(state.store.as_ref(), &state.notifier, notice).await {
        Ok(r) => CallbackOutcome::Applied(r),
        Err(BookingError::BookingNotFound) => CallbackOutcome::BookingNotFound,
        Err(BookingError::Validation(msg)) => CallbackOutcome::Malformed(msg),
        Err(e) => CallbackOutcome::Failed(e),
    }
}

fn booking_code(order_id: &str) -> Option<String> {
    let code = domain::code_from_order_id(order_id);
    (!code.is_empty()).then(|| code.to_string())
}

/// Shared by the MoMo return redirect and IPN. The signature is checked
/// before anything else is read.
pub async fn handle_momo_callback(state: &AppState, cb: &momo::Callback) -> CallbackOutcome {
    let Some(creds) = state.gateways.momo_credentials() else {
        tracing::warn!("momo callback received but momo is not configured");
        return CallbackOutcome::InvalidSignature;
    };
    if !cb.verify(&creds) {
        tracing::warn!(order_id = %cb.order_id, "momo callback signature mismatch");
        return CallbackOutcome::InvalidSignature;
    }
    if !cb.is_success() {
        tracing::info!(order_id = %cb.order_id, result_code = %cb.result_code, "momo payment not successful");
        return CallbackOutcome::PaymentFailed {
            code: cb.result_code.trim().to_string(),
        };
    }
    let Ok(amount) = cb.amount_vnd() else {
        return CallbackOutcome::InvalidAmount;
    };
    let Some(code) = booking_code(&cb.order_id) else {
        return CallbackOutcome::Malformed("orderId missing".to_string());
    };
    let Some(external_ref) = cb.external_ref() else {
        return CallbackOutcome::Malformed("transId missing".to_string());
    };
    settle_callback(
        state,
        PaymentNotice {
            code,
            provider: PaymentProvider::Momo,
            external_ref,
            amount,
        },
    )
    .await
}

/// Shared by the VNPay return redirect and IPN.
pub async fn handle_vnpay_callback(
    state: &AppState,
    params: &BTreeMap<String, String>,
) -> CallbackOutcome {
    let Some(secret) = state.gateways.vnpay_hash_secret() else {
        tracing::warn!("vnpay callback received but vnpay is not configured");
        return CallbackOutcome::InvalidSignature;
    };
    if !vnpay::verify(params, secret) {
        tracing::warn!(txn_ref = ?params.get("vnp_TxnRef"), "vnpay callback signature mismatch");
        return CallbackOutcome::InvalidSignature;
    }
    let cb = match vnpay::Callback::from_params(params) {
        Ok(cb) => cb,
        Err(SignatureError::InvalidAmount(raw)) => {
            tracing::warn!(amount = %raw, "vnpay callback amount invalid");
            return CallbackOutcome::InvalidAmount;
        }
        Err(e) => return CallbackOutcome::Malformed(e.to_string()),
    };
    if !cb.is_success() {
        tracing::info!(txn_ref = %cb.txn_ref, response_code = %cb.response_code, "vnpay payment not successful");
        return CallbackOutcome::PaymentFailed {
            code: cb.response_code.clone(),
        };
    }
    let Some(code) = booking_code(&cb.txn_ref) else {
        return CallbackOutcome::Malformed("vnp_TxnRef missing".to_string());
    };
    let external_ref = cb.external_ref().unwrap_or_else(|| cb.txn_ref.clone());

    // The link was issued for exactly the amount due. Redeliveries of an
    // applied reference skip the check since the amount due has moved on.
    let booking = match state.store.find_booking(&code).await {
        Ok(Some(b)) => b,
        Ok(None) => return CallbackOutcome::BookingNotFound,
        Err(e) => return CallbackOutcome::Failed(e),
    };
    let due = booking.amount_due();
    let replay = booking.has_payment_ref(PaymentProvider::Vnpay, &external_ref);
    if !replay && due > 0 && cb.amount != due {
        tracing::warn!(
            code = %code,
            amount = cb.amount,
            amount_due = due,
            "vnpay amount does not match amount due"
        );
        return CallbackOutcome::InvalidAmount;
    }

    settle_callback(
        state,
        PaymentNotice {
            code,
            provider: PaymentProvider::Vnpay,
            external_ref,
            amount: cb.amount,
        },
    )
    .await
}
