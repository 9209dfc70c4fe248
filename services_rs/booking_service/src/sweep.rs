//! Daily pre-departure sweep.
//!
//! Looks at tours leaving the day after the reference date. Tours that met
//! their group size get confirmed and their customers are asked to settle the
//! balance; the others are told they can ask for a refund or a transfer. The
//! sweep only notifies: apart from confirming tours it never writes.

use crate::coordinator;
use crate::domain::{Booking, BookingStatus, Tour, TourStatus};
use crate::error::BookingError;
use crate::notify::Notifier;
use crate::store::Store;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use futures_util::future::join_all;
use serde::Serialize;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GuestDrift {
    pub tour_id: String,
    pub recorded: i32,
    pub implied: i32,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SweepReport {
    pub reference_date: Option<NaiveDate>,
    pub departure_date: Option<NaiveDate>,
    pub tours_checked: usize,
    pub tours_confirmed: usize,
    pub tours_failed: usize,
    pub balance_reminders: usize,
    pub refund_notices: usize,
    pub guest_drift: Vec<GuestDrift>,
}

/// Guests the tour should hold according to its bookings: every party whose
/// deposit was admitted, including parties canceled afterwards since a
/// cancellation does not release seats.
fn implied_guests(bookings: &[Booking]) -> i32 {
    bookings
        .iter()
        .filter(|b| b.deposit_paid && !b.capacity_conflict)
        .map(Booking::party_size)
        .fold(0, i32::saturating_add)
}

fn owes_balance(b: &Booking) -> bool {
    b.deposit_paid
        && b.booking_status == BookingStatus::Pending
        && !b.capacity_conflict
        && b.remaining_balance() > 0
}

/// Fully paid bookings are settled with the customer directly and get no
/// mail from the sweep.
fn awaits_departure(b: &Booking) -> bool {
    b.deposit_paid && b.booking_status == BookingStatus::Pending && !b.capacity_conflict
}

pub struct DepartureSweep {
    store: Arc<dyn Store>,
    notifier: Notifier,
}

impl DepartureSweep {
    pub fn new(store: Arc<dyn Store>, notifier: Notifier) -> Self {
        Self { store, notifier }
    }

    pub async fn run_once(&self, reference_date: NaiveDate) -> Result<SweepReport, BookingError> {
        let departure = reference_date
            .succ_opt()
            .ok_or_else(|| BookingError::Validation("reference date out of range".to_string()))?;
        let tours = self.store.tours_departing_on(departure).await?;

        let mut report = SweepReport {
            reference_date: Some(reference_date),
            departure_date: Some(departure),
            ..SweepReport::default()
        };
        for tour in tours {
            if tour.status == TourStatus::Closed {
                continue;
            }
            report.tours_checked += 1;
            if let Err(e) = self.sweep_tour(&tour, &mut report).await {
                report.tours_failed += 1;
                tracing::error!(tour_id = %tour.id, error = %e, "departure sweep failed for tour");
            }
        }
        Ok(report)
    }

    async fn sweep_tour(&self, tour: &Tour, report: &mut SweepReport) -> Result<(), BookingError> {
        let bookings = self.store.bookings_for_tour(&tour.id).await?;

        let implied = implied_guests(&bookings);
        if implied != tour.current_guests {
            tracing::warn!(
                tour_id = %tour.id,
                recorded = tour.current_guests,
                implied,
                "guest count drift"
            );
            report.guest_drift.push(GuestDrift {
                tour_id: tour.id.clone(),
                recorded: tour.current_guests,
                implied,
            });
        }

        if tour.is_confirmed() {
            let confirmed_now =
                coordinator::maybe_confirm_tour(self.store.as_ref(), &self.notifier, &tour.id)
                    .await?;
            if confirmed_now {
                // The confirmation mail already carries the balance and link.
                report.tours_confirmed += 1;
                return Ok(());
            }
            let due: Vec<&Booking> = bookings.iter().filter(|b| owes_balance(b)).collect();
            join_all(due.iter().map(|b| self.notifier.balance_reminder(tour, b))).await;
            report.balance_reminders += due.len();
        } else {
            let affected: Vec<&Booking> = bookings.iter().filter(|b| awaits_departure(b)).collect();
            tracing::info!(
                tour_id = %tour.id,
                current_guests = tour.current_guests,
                min_guests = tour.min_guests,
                affected = affected.len(),
                "tour below group size at departure"
            );
            join_all(affected.iter().map(|b| self.notifier.not_enough_guests(tour, b))).await;
            report.refund_notices += affected.len();
        }
        Ok(())
    }
}

/// First instant at `hour_utc:00` strictly after `now`.
pub fn next_run_after(now: DateTime<Utc>, hour_utc: u32) -> DateTime<Utc> {
    let today = now
        .date_naive()
        .and_hms_opt(hour_utc.min(23), 0, 0)
        .map(|t| t.and_utc())
        .unwrap_or(now);
    if today > now {
        today
    } else {
        today + Duration::days(1)
    }
}

pub fn spawn_daily(sweep: Arc<DepartureSweep>, hour_utc: u32) {
    tokio::spawn(async move {
        loop {
            let now = Utc::now();
            let next = next_run_after(now, hour_utc);
            let wait = (next - now).to_std().unwrap_or_default();
            tracing::info!(next_run = %next, "departure sweep scheduled");
            tokio::time::sleep(wait).await;

            match sweep.run_once(Utc::now().date_naive()).await {
                Ok(report) => tracing::info!(
                    departure_date = ?report.departure_date,
                    tours_checked = report.tours_checked,
                    tours_confirmed = report.tours_confirmed,
                    tours_failed = report.tours_failed,
                    balance_reminders = report.balance_reminders,
                    refund_notices = report.refund_notices,
                    drift = report.guest_drift.len(),
                    "departure sweep finished"
                ),
                Err(e) => tracing::error!(error = %e, "departure sweep failed"),
            }
        }
    });
}
