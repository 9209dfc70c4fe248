use crate::domain::{Booking, BookingDraft, DepositRate, PaymentEffect, PaymentRef, Tour};
use crate::error::BookingError;
use async_trait::async_trait;
use chrono::NaiveDate;

#[cfg(test)]
pub mod memory;

/// How many fresh booking codes to try before giving up on a collision streak.
pub const MAX_CODE_ATTEMPTS: usize = 5;

/// Persistence for tours and bookings.
///
/// Every mutating method is atomic: an implementation either applies all of
/// its changes or none. `settle_payment` locks the booking before the tour,
/// and no other method locks both, so the lock order can never invert.
#[async_trait]
pub trait Store: Send + Sync {
    async fn find_tour(&self, tour_id: &str) -> Result<Option<Tour>, BookingError>;

    /// Locks the tour, plans the booking against it and persists the result
    /// under a fresh unique code.
    async fn create_booking(
        &self,
        draft: &BookingDraft,
        deposit_rate: DepositRate,
    ) -> Result<(Booking, Tour), BookingError>;

    async fn find_booking(&self, code: &str) -> Result<Option<Booking>, BookingError>;

    /// Newest first. Returns the page and the total count for the user.
    async fn list_user_bookings(
        &self,
        user_id: &str,
        offset: i64,
        limit: i64,
    ) -> Result<(Vec<Booking>, i64), BookingError>;

    /// Cancels a pending booking owned by `user_id`. A booking owned by
    /// someone else is reported as not found.
    async fn cancel_booking(&self, code: &str, user_id: &str) -> Result<Booking, BookingError>;

    /// Applies a verified payment to the booking and, on its first deposit,
    /// admits the party into the tour. Both rows change in one transaction.
    async fn settle_payment(
        &self,
        code: &str,
        payment: PaymentRef,
    ) -> Result<(Booking, PaymentEffect), BookingError>;

    /// Flips a pending tour to confirmed once its guest threshold is met.
    /// Returns the tour only when this call made the transition.
    async fn confirm_tour_if_ready(&self, tour_id: &str) -> Result<Option<Tour>, BookingError>;

    async fn bookings_for_tour(&self, tour_id: &str) -> Result<Vec<Booking>, BookingError>;

    async fn tours_departing_on(&self, date: NaiveDate) -> Result<Vec<Tour>, BookingError>;
}
