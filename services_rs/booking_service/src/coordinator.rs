//! The tour's guest count and status are the contended resource. Admission
//! and confirmation rules live here and both stores apply them under lock.

use crate::domain::{BookingStatus, Tour, TourStatus};
use crate::error::BookingError;
use crate::notify::Notifier;
use crate::store::Store;
use futures_util::future::join_all;

/// Adds a party to the tour. When the party does not fit, either under the
/// ceiling or in the counter itself, the tour is left untouched and the
/// number of remaining slots is returned.
pub fn admit_guests(tour: &mut Tour, guests: i32) -> Result<(), i32> {
    if let Some(available) = tour.available_slots() {
        if guests > available {
            return Err(available);
        }
    }
    let Some(next) = tour.current_guests.checked_add(guests) else {
        return Err(i32::MAX.saturating_sub(tour.current_guests).max(0));
    };
    tour.current_guests = next;
    Ok(())
}

pub fn should_confirm(tour: &Tour) -> bool {
    tour.status == TourStatus::Pending && tour.current_guests >= tour.min_guests
}

/// Confirms the tour if its threshold is met and tells every deposited,
/// still-pending booking about it. Returns whether this call confirmed it.
pub async fn maybe_confirm_tour(
    store: &dyn Store,
    notifier: &Notifier,
    tour_id: &str,
) -> Result<bool, BookingError> {
    let Some(tour) = store.confirm_tour_if_ready(tour_id).await? else {
        return Ok(false);
    };
    tracing::info!(
        tour_id = %tour.id,
        current_guests = tour.current_guests,
        min_guests = tour.min_guests,
        "tour confirmed"
    );

    let bookings = store.bookings_for_tour(tour_id).await?;
    let to_notify: Vec<_> = bookings
        .iter()
        .filter(|b| {
            b.deposit_paid && b.booking_status == BookingStatus::Pending && !b.capacity_conflict
        })
        .collect();
    join_all(to_notify.iter().map(|b| notifier.tour_confirmed(&tour, b))).await;
    Ok(true)
}
