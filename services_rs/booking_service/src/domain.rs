//! Tour and booking records plus the pure parts of the booking state machine.
//!
//! Everything here is synchronous and storage-agnostic. The stores run these
//! functions while holding the row locks that make them atomic.

use crate::coordinator;
use crate::error::BookingError;
use chrono::{DateTime, NaiveDate, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};

pub const CODE_PREFIX: &str = "BK";
const CODE_SUFFIX_LEN: usize = 6;
const CODE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
const MAX_EXTERNAL_REF_LEN: usize = 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TourStatus {
    Pending,
    Confirmed,
    InProgress,
    Completed,
    Closed,
}

impl TourStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Confirmed => "confirmed",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Closed => "closed",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "pending" => Some(Self::Pending),
            "confirmed" => Some(Self::Confirmed),
            "in_progress" => Some(Self::InProgress),
            "completed" => Some(Self::Completed),
            "closed" => Some(Self::Closed),
            _ => None,
        }
    }
}

/// Stored and serialized as the single-letter codes `p`, `c`, `x`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BookingStatus {
    #[serde(rename = "p")]
    Pending,
    #[serde(rename = "c")]
    Confirmed,
    #[serde(rename = "x")]
    Canceled,
}

impl BookingStatus {
    pub fn code(self) -> &'static str {
        match self {
            Self::Pending => "p",
            Self::Confirmed => "c",
            Self::Canceled => "x",
        }
    }

    pub fn from_code(raw: &str) -> Option<Self> {
        match raw.trim() {
            "p" => Some(Self::Pending),
            "c" => Some(Self::Confirmed),
            "x" => Some(Self::Canceled),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentProvider {
    Momo,
    Vnpay,
    Manual,
    Cod,
}

impl PaymentProvider {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Momo => "momo",
            Self::Vnpay => "vnpay",
            Self::Manual => "manual",
            Self::Cod => "cod",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "momo" => Some(Self::Momo),
            "vnpay" => Some(Self::Vnpay),
            "manual" => Some(Self::Manual),
            "cod" => Some(Self::Cod),
            _ => None,
        }
    }

    /// Providers that hand out a payment URL.
    pub fn is_online(self) -> bool {
        matches!(self, Self::Momo | Self::Vnpay)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Tour {
    pub id: String,
    pub title: String,
    pub destination: Option<String>,
    pub start_date: NaiveDate,
    pub end_date: Option<NaiveDate>,
    /// Hard ceiling on admitted guests; `None` means unlimited.
    pub quantity: Option<i32>,
    pub min_guests: i32,
    pub current_guests: i32,
    pub price_adult: i64,
    pub price_child: Option<i64>,
    pub status: TourStatus,
}

impl Tour {
    /// A tour counts as confirmed for pricing purposes as soon as the guest
    /// threshold is met, even before the status flips.
    pub fn is_confirmed(&self) -> bool {
        self.status == TourStatus::Confirmed || self.current_guests >= self.min_guests
    }

    pub fn available_slots(&self) -> Option<i32> {
        self.quantity.map(|q| (q - self.current_guests).max(0))
    }

    /// Child price, or 60% of the adult price (rounded half up) when unset.
    pub fn child_price(&self) -> i64 {
        self.price_child
            .unwrap_or_else(|| (self.price_adult.max(0) * 6 + 5) / 10)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Party {
    pub adults: i32,
    pub children: i32,
}

impl Party {
    pub fn new(adults: i32, children: i32) -> Result<Self, BookingError> {
        if adults < 0 || children < 0 {
            return Err(BookingError::Validation(
                "numAdults and numChildren must be >= 0".to_string(),
            ));
        }
        let size = adults
            .checked_add(children)
            .ok_or_else(|| BookingError::Validation("party size is too large".to_string()))?;
        if size == 0 {
            return Err(BookingError::Validation(
                "at least one guest is required".to_string(),
            ));
        }
        Ok(Self { adults, children })
    }

    pub fn size(&self) -> i32 {
        self.adults.saturating_add(self.children)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Contact {
    pub full_name: Option<String>,
    pub email: Option<String>,
    pub phone_number: Option<String>,
    pub address: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PaymentRef {
    pub provider: PaymentProvider,
    pub external_ref: String,
    pub amount: i64,
    pub at: DateTime<Utc>,
}

/// Deposit fraction applied while a tour is still gathering guests.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DepositRate(f64);

impl DepositRate {
    pub const FULL: DepositRate = DepositRate(1.0);

    pub fn new(rate: f64) -> Result<Self, String> {
        if !rate.is_finite() || rate <= 0.0 || rate > 1.0 {
            return Err(format!("deposit rate must satisfy 0 < rate <= 1 (got {rate})"));
        }
        Ok(Self(rate))
    }

    pub fn value(self) -> f64 {
        self.0
    }

    pub fn apply(self, total: i64) -> i64 {
        if self.0 >= 1.0 {
            return total;
        }
        (total as f64 * self.0).round() as i64
    }
}

impl Default for DepositRate {
    fn default() -> Self {
        Self(0.2)
    }
}

/// Validated input for the booking factory.
#[derive(Debug, Clone)]
pub struct BookingDraft {
    pub tour_id: String,
    pub user_id: String,
    pub contact: Contact,
    pub party: Party,
    pub payment_method: PaymentProvider,
    pub note: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Booking {
    pub id: String,
    pub code: String,
    pub tour_id: String,
    pub user_id: String,
    #[serde(flatten)]
    pub contact: Contact,
    pub num_adults: i32,
    pub num_children: i32,
    pub price_adult: i64,
    pub price_child: i64,
    pub total_price: i64,
    pub deposit_rate: f64,
    pub deposit_amount: i64,
    pub paid_amount: i64,
    pub deposit_paid: bool,
    pub booking_status: BookingStatus,
    pub payment_method: PaymentProvider,
    pub payment_refs: Vec<PaymentRef>,
    /// Set when the first deposit arrived after the tour ran out of slots.
    pub capacity_conflict: bool,
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// What a verified payment did to a booking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentEffect {
    /// The `(provider, external_ref)` pair was applied before.
    AlreadyProcessed,
    Recorded { first_deposit: bool, fully_paid: bool },
    /// First deposit recorded, but admitting the party would overshoot the
    /// tour's ceiling. The customer has to be refunded out-of-band.
    CapacityConflict { available: i32 },
    /// Money arrived for a booking that was already canceled.
    CanceledBookingPaid,
}

impl Booking {
    pub fn party_size(&self) -> i32 {
        self.num_adults.saturating_add(self.num_children)
    }

    pub fn remaining_balance(&self) -> i64 {
        (self.total_price - self.paid_amount).max(0)
    }

    /// Amount the customer should pay next: the deposit until one has been
    /// received, the remaining balance afterwards.
    pub fn amount_due(&self) -> i64 {
        if self.booking_status == BookingStatus::Canceled || self.capacity_conflict {
            return 0;
        }
        if !self.deposit_paid {
            return self.deposit_amount.min(self.remaining_balance());
        }
        self.remaining_balance()
    }

    pub fn has_payment_ref(&self, provider: PaymentProvider, external_ref: &str) -> bool {
        self.payment_refs
            .iter()
            .any(|p| p.provider == provider && p.external_ref == external_ref)
    }

    pub fn is_owned_by(&self, user_id: &str) -> bool {
        self.user_id == user_id
    }

    pub fn cancel_by_user(&mut self, now: DateTime<Utc>) -> Result<(), BookingError> {
        if self.booking_status != BookingStatus::Pending {
            return Err(BookingError::NotCancellable);
        }
        self.booking_status = BookingStatus::Canceled;
        self.updated_at = now;
        Ok(())
    }
}

pub fn generate_code() -> String {
    let mut rng = rand::thread_rng();
    let suffix: String = (0..CODE_SUFFIX_LEN)
        .map(|_| CODE_ALPHABET[rng.gen_range(0..CODE_ALPHABET.len())] as char)
        .collect();
    format!("{CODE_PREFIX}{suffix}")
}

pub fn is_valid_code(raw: &str) -> bool {
    raw.len() == CODE_PREFIX.len() + CODE_SUFFIX_LEN
        && raw.starts_with(CODE_PREFIX)
        && raw.bytes().all(|b| CODE_ALPHABET.contains(&b))
}

/// Gateway order ids must be unique per attempt, so the booking code gets a
/// millisecond suffix.
pub fn payment_order_id(code: &str, now: DateTime<Utc>) -> String {
    format!("{code}-{}", now.timestamp_millis())
}

pub fn code_from_order_id(order_id: &str) -> &str {
    let trimmed = order_id.trim();
    trimmed.split_once('-').map(|(c, _)| c).unwrap_or(trimmed)
}

/// Steps 1-6 of booking creation: validates the request against the tour as
/// it is right now and builds the pending booking. The caller must hold the
/// tour lock and persist the result in the same transaction.
pub fn plan_booking(
    tour: &Tour,
    draft: &BookingDraft,
    deposit_rate: DepositRate,
    code: String,
    now: DateTime<Utc>,
) -> Result<Booking, BookingError> {
    if tour.status == TourStatus::Closed {
        return Err(BookingError::TourClosed);
    }
    let guests = draft.party.size();
    if guests <= 0 {
        return Err(BookingError::Validation(
            "at least one guest is required".to_string(),
        ));
    }
    if let Some(available) = tour.available_slots() {
        if guests > available {
            return Err(BookingError::CapacityExceeded { available });
        }
    }

    let price_adult = tour.price_adult.max(0);
    let price_child = tour.child_price().max(0);
    let total_price = i64::from(draft.party.adults)
        .checked_mul(price_adult)
        .and_then(|a| {
            i64::from(draft.party.children)
                .checked_mul(price_child)
                .and_then(|c| a.checked_add(c))
        })
        .ok_or_else(|| BookingError::Validation("total price overflow".to_string()))?;

    let rate = if tour.is_confirmed() {
        DepositRate::FULL
    } else {
        deposit_rate
    };

    Ok(Booking {
        id: uuid::Uuid::new_v4().to_string(),
        code,
        tour_id: tour.id.clone(),
        user_id: draft.user_id.clone(),
        contact: draft.contact.clone(),
        num_adults: draft.party.adults,
        num_children: draft.party.children,
        price_adult,
        price_child,
        total_price,
        deposit_rate: rate.value(),
        deposit_amount: rate.apply(total_price),
        paid_amount: 0,
        deposit_paid: false,
        booking_status: BookingStatus::Pending,
        payment_method: draft.payment_method,
        payment_refs: Vec::new(),
        capacity_conflict: false,
        note: draft.note.clone(),
        created_at: now,
        updated_at: now,
    })
}

/// Applies one verified payment to a booking and, on its first deposit, to
/// the tour's guest count. The caller must hold locks on both rows and
/// persist both in one transaction unless the effect is `AlreadyProcessed`.
pub fn settle_payment(
    booking: &mut Booking,
    tour: &mut Tour,
    payment: PaymentRef,
) -> Result<PaymentEffect, BookingError> {
    if payment.amount < 0 {
        return Err(BookingError::Validation("amount must be >= 0".to_string()));
    }
    let external_ref = payment.external_ref.trim();
    if external_ref.is_empty() || external_ref.len() > MAX_EXTERNAL_REF_LEN {
        return Err(BookingError::Validation(
            "payment reference must be 1..128 characters".to_string(),
        ));
    }
    if booking.has_payment_ref(payment.provider, external_ref) {
        return Ok(PaymentEffect::AlreadyProcessed);
    }

    let amount = payment.amount;
    let at = payment.at;
    booking.paid_amount = booking
        .paid_amount
        .checked_add(amount)
        .ok_or_else(|| BookingError::Validation("paid amount overflow".to_string()))?;
    booking.payment_refs.push(PaymentRef {
        external_ref: external_ref.to_string(),
        ..payment
    });
    booking.updated_at = at;

    if booking.booking_status == BookingStatus::Canceled {
        return Ok(PaymentEffect::CanceledBookingPaid);
    }

    let first_deposit = !booking.deposit_paid && amount > 0;
    if first_deposit {
        booking.deposit_paid = true;
        if let Err(available) = coordinator::admit_guests(tour, booking.party_size()) {
            booking.capacity_conflict = true;
            return Ok(PaymentEffect::CapacityConflict { available });
        }
    }

    let mut fully_paid = false;
    if booking.booking_status == BookingStatus::Pending
        && !booking.capacity_conflict
        && booking.paid_amount >= booking.total_price
    {
        booking.booking_status = BookingStatus::Confirmed;
        fully_paid = true;
    }

    Ok(PaymentEffect::Recorded {
        first_deposit,
        fully_paid,
    })
}


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;

    fn planned(tour: &Tour, adults: i32, children: i32) -> Booking {
        plan_booking(
            tour,
            &draft(adults, children),
            DepositRate::default(),
            "BKTEST01".to_string(),
            Utc::now(),
        )
        .expect("plan")
    }

    #[test]
    fn rejects_party_that_overshoots_quantity_with_available_count() {
        let t = tour(Some(10), 20, 8);
        let err = plan_booking(
            &t,
            &draft(3, 0),
            DepositRate::default(),
            "BKTEST01".to_string(),
            Utc::now(),
        )
        .unwrap_err();
        assert_eq!(err, BookingError::CapacityExceeded { available: 2 });
    }

    #[test]
    fn rejects_closed_tour() {
        let mut t = tour(None, 10, 0);
        t.status = TourStatus::Closed;
        let err = plan_booking(
            &t,
            &draft(1, 0),
            DepositRate::default(),
            "BKTEST01".to_string(),
            Utc::now(),
        )
        .unwrap_err();
        assert_eq!(err, BookingError::TourClosed);
    }

    #[test]
    fn empty_party_is_rejected() {
        assert!(Party::new(0, 0).is_err());
        assert!(Party::new(-1, 2).is_err());
        assert_eq!(Party::new(0, 1).map(|p| p.size()), Ok(1));
        assert!(matches!(
            Party::new(i32::MAX, 1),
            Err(BookingError::Validation(_))
        ));
    }

    #[test]
    fn child_price_defaults_to_sixty_percent() {
        let t = tour(None, 10, 0);
        let b = planned(&t, 2, 1);
        assert_eq!(b.price_child, 600);
        assert_eq!(b.total_price, 2600);
        assert_eq!(b.deposit_rate, 0.2);
        assert_eq!(b.deposit_amount, 520);
        assert_eq!(b.booking_status, BookingStatus::Pending);
        assert_eq!(b.paid_amount, 0);
        assert!(!b.deposit_paid);
        assert!(b.payment_refs.is_empty());
    }

    #[test]
    fn confirmed_tour_requires_full_payment() {
        let t = tour(None, 10, 10);
        let b = planned(&t, 1, 0);
        assert_eq!(b.deposit_rate, 1.0);
        assert_eq!(b.deposit_amount, b.total_price);
    }

    #[test]
    fn price_snapshot_is_frozen() {
        let mut t = tour(None, 10, 0);
        let b = planned(&t, 1, 0);
        t.price_adult = 5000;
        assert_eq!(b.total_price, 1000);
    }

    #[test]
    fn deposit_rate_bounds() {
        assert!(DepositRate::new(0.0).is_err());
        assert!(DepositRate::new(1.5).is_err());
        assert!(DepositRate::new(f64::NAN).is_err());
        assert_eq!(DepositRate::new(1.0).map(|r| r.apply(999)), Ok(999));
        assert_eq!(DepositRate::new(0.3).map(|r| r.apply(1001)), Ok(300));
    }

    #[test]
    fn first_deposit_admits_party_and_second_payment_confirms() {
        let mut t = tour(None, 10, 0);
        let mut b = planned(&t, 2, 0);
        b.total_price = 1000;

        let effect = settle_payment(&mut b, &mut t, payment(PaymentProvider::Momo, "tx-1", 200))
            .expect("settle");
        assert_eq!(
            effect,
            PaymentEffect::Recorded {
                first_deposit: true,
                fully_paid: false
            }
        );
        assert!(b.deposit_paid);
        assert_eq!(t.current_guests, 2);

        let effect = settle_payment(&mut b, &mut t, payment(PaymentProvider::Vnpay, "tx-2", 800))
            .expect("settle");
        assert_eq!(
            effect,
            PaymentEffect::Recorded {
                first_deposit: false,
                fully_paid: true
            }
        );
        assert_eq!(b.paid_amount, 1000);
        assert_eq!(b.booking_status, BookingStatus::Confirmed);
        assert_eq!(t.current_guests, 2);
    }

    #[test]
    fn replayed_reference_is_a_no_op() {
        let mut t = tour(None, 10, 0);
        let mut b = planned(&t, 1, 0);
        settle_payment(&mut b, &mut t, payment(PaymentProvider::Momo, "tx-1", 200))
            .expect("settle");
        let snapshot = (b.clone(), t.clone());

        let effect = settle_payment(&mut b, &mut t, payment(PaymentProvider::Momo, "tx-1", 200))
            .expect("settle");
        assert_eq!(effect, PaymentEffect::AlreadyProcessed);
        assert_eq!((b, t), snapshot);
    }

    #[test]
    fn same_reference_from_another_provider_is_distinct() {
        let mut t = tour(None, 10, 0);
        let mut b = planned(&t, 1, 0);
        settle_payment(&mut b, &mut t, payment(PaymentProvider::Momo, "123", 100))
            .expect("settle");
        let effect = settle_payment(&mut b, &mut t, payment(PaymentProvider::Vnpay, "123", 100))
            .expect("settle");
        assert!(matches!(effect, PaymentEffect::Recorded { .. }));
        assert_eq!(b.paid_amount, 200);
    }

    #[test]
    fn first_deposit_past_ceiling_is_flagged_not_admitted() {
        let mut t = tour(Some(10), 20, 9);
        let mut b = planned(&t, 1, 0);
        b.num_adults = 2;
        b.total_price = 200;

        let effect = settle_payment(&mut b, &mut t, payment(PaymentProvider::Momo, "tx-1", 200))
            .expect("settle");
        assert_eq!(effect, PaymentEffect::CapacityConflict { available: 1 });
        assert_eq!(t.current_guests, 9);
        assert!(b.capacity_conflict);
        assert_eq!(b.booking_status, BookingStatus::Pending);
        assert_eq!(b.paid_amount, 200);
        assert_eq!(b.amount_due(), 0);
    }

    #[test]
    fn first_deposit_that_would_wrap_the_guest_counter_is_a_conflict() {
        let mut t = tour(None, 20, i32::MAX - 1);
        let mut b = planned(&tour(None, 20, 0), 2, 0);

        let effect = settle_payment(&mut b, &mut t, payment(PaymentProvider::Momo, "tx-1", 400))
            .expect("settle");
        assert_eq!(effect, PaymentEffect::CapacityConflict { available: 1 });
        assert_eq!(t.current_guests, i32::MAX - 1);
        assert!(b.capacity_conflict);
    }

    #[test]
    fn payment_on_canceled_booking_is_recorded_without_side_effects() {
        let mut t = tour(None, 10, 0);
        let mut b = planned(&t, 1, 0);
        b.cancel_by_user(Utc::now()).expect("cancel");
        let effect = settle_payment(&mut b, &mut t, payment(PaymentProvider::Momo, "tx-1", 200))
            .expect("settle");
        assert_eq!(effect, PaymentEffect::CanceledBookingPaid);
        assert_eq!(t.current_guests, 0);
        assert!(!b.deposit_paid);
        assert_eq!(b.booking_status, BookingStatus::Canceled);
    }

    #[test]
    fn zero_amount_is_not_a_deposit_and_negative_is_rejected() {
        let mut t = tour(None, 10, 0);
        let mut b = planned(&t, 1, 0);
        let effect = settle_payment(&mut b, &mut t, payment(PaymentProvider::Manual, "m-0", 0))
            .expect("settle");
        assert_eq!(
            effect,
            PaymentEffect::Recorded {
                first_deposit: false,
                fully_paid: false
            }
        );
        assert!(!b.deposit_paid);
        assert!(settle_payment(&mut b, &mut t, payment(PaymentProvider::Manual, "m-1", -5)).is_err());
    }

    #[test]
    fn paid_amount_never_decreases_over_a_sequence() {
        let mut t = tour(None, 3, 0);
        let mut b = planned(&t, 1, 0);
        let mut last = b.paid_amount;
        for (i, amount) in [200, 0, 200, 300, 300, 1000].iter().enumerate() {
            let r = format!("tx-{}", i % 4);
            settle_payment(&mut b, &mut t, payment(PaymentProvider::Momo, &r, *amount))
                .expect("settle");
            assert!(b.paid_amount >= last);
            last = b.paid_amount;
        }
    }

    #[test]
    fn cancel_only_from_pending() {
        let t = tour(None, 10, 0);
        let mut b = planned(&t, 1, 0);
        b.booking_status = BookingStatus::Confirmed;
        assert_eq!(
            b.cancel_by_user(Utc::now()).unwrap_err(),
            BookingError::NotCancellable
        );
        b.booking_status = BookingStatus::Pending;
        assert!(b.cancel_by_user(Utc::now()).is_ok());
        assert_eq!(b.booking_status, BookingStatus::Canceled);
    }

    #[test]
    fn amount_due_switches_from_deposit_to_balance() {
        let mut t = tour(None, 10, 0);
        let mut b = planned(&t, 1, 0);
        assert_eq!(b.amount_due(), 200);
        settle_payment(&mut b, &mut t, payment(PaymentProvider::Momo, "tx-1", 200))
            .expect("settle");
        assert_eq!(b.amount_due(), 800);
    }

    #[test]
    fn codes_and_order_ids() {
        let code = generate_code();
        assert!(is_valid_code(&code), "{code}");
        assert!(!is_valid_code("BK12"));
        assert!(!is_valid_code("XX123456"));
        let order_id = payment_order_id(&code, Utc::now());
        assert_eq!(code_from_order_id(&order_id), code);
        assert_eq!(code_from_order_id("BKABCDEF"), "BKABCDEF");
    }
}
