use super::{Store, MAX_CODE_ATTEMPTS};
use crate::coordinator;
use crate::domain::{
    self, Booking, BookingDraft, DepositRate, PaymentEffect, PaymentRef, TourStatus, Tour,
};
use crate::error::BookingError;
use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use std::collections::HashMap;
use tokio::sync::Mutex;

#[derive(Default)]
struct Data {
    tours: HashMap<String, Tour>,
    bookings: Vec<Booking>,
}

/// Single-mutex store used by unit tests. Holding the mutex for a whole
/// operation gives the same atomicity as the Postgres row locks.
#[derive(Default)]
pub struct MemoryStore {
    data: Mutex<Data>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn put_tour(&self, tour: Tour) {
        self.data.lock().await.tours.insert(tour.id.clone(), tour);
    }

    pub async fn tour(&self, tour_id: &str) -> Option<Tour> {
        self.data.lock().await.tours.get(tour_id).cloned()
    }

    pub async fn put_booking(&self, booking: Booking) {
        let mut data = self.data.lock().await;
        data.bookings.retain(|b| b.code != booking.code);
        data.bookings.push(booking);
    }

    pub async fn booking(&self, code: &str) -> Option<Booking> {
        self.data
            .lock()
            .await
            .bookings
            .iter()
            .find(|b| b.code == code)
            .cloned()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn find_tour(&self, tour_id: &str) -> Result<Option<Tour>, BookingError> {
        Ok(self.tour(tour_id).await)
    }

    async fn create_booking(
        &self,
        draft: &BookingDraft,
        deposit_rate: DepositRate,
    ) -> Result<(Booking, Tour), BookingError> {
        let mut data = self.data.lock().await;
        let tour = data
            .tours
            .get(&draft.tour_id)
            .cloned()
            .ok_or(BookingError::TourNotFound)?;
        for _ in 0..MAX_CODE_ATTEMPTS {
            let code = domain::generate_code();
            if data.bookings.iter().any(|b| b.code == code) {
                continue;
            }
            let booking = domain::plan_booking(&tour, draft, deposit_rate, code, Utc::now())?;
            data.bookings.push(booking.clone());
            return Ok((booking, tour));
        }
        Err(BookingError::Storage(
            "could not allocate a unique booking code".to_string(),
        ))
    }

    async fn find_booking(&self, code: &str) -> Result<Option<Booking>, BookingError> {
        Ok(self.booking(code).await)
    }

    async fn list_user_bookings(
        &self,
        user_id: &str,
        offset: i64,
        limit: i64,
    ) -> Result<(Vec<Booking>, i64), BookingError> {
        let data = self.data.lock().await;
        let mut mine: Vec<&Booking> = data.bookings.iter().filter(|b| b.user_id == user_id).collect();
        mine.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        let total = mine.len() as i64;
        let page = mine
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .cloned()
            .collect();
        Ok((page, total))
    }

    async fn cancel_booking(&self, code: &str, user_id: &str) -> Result<Booking, BookingError> {
        let mut data = self.data.lock().await;
        let booking = data
            .bookings
            .iter_mut()
            .find(|b| b.code == code && b.is_owned_by(user_id))
            .ok_or(BookingError::BookingNotFound)?;
        booking.cancel_by_user(Utc::now())?;
        Ok(booking.clone())
    }

    async fn settle_payment(
        &self,
        code: &str,
        payment: PaymentRef,
    ) -> Result<(Booking, PaymentEffect), BookingError> {
        let mut data = self.data.lock().await;
        let idx = data
            .bookings
            .iter()
            .position(|b| b.code == code)
            .ok_or(BookingError::BookingNotFound)?;
        let mut booking = data.bookings[idx].clone();
        let mut tour = data
            .tours
            .get(&booking.tour_id)
            .cloned()
            .ok_or(BookingError::TourNotFound)?;

        let effect = domain::settle_payment(&mut booking, &mut tour, payment)?;
        if effect != PaymentEffect::AlreadyProcessed {
            data.bookings[idx] = booking.clone();
            data.tours.insert(tour.id.clone(), tour);
        }
        Ok((booking, effect))
    }

    async fn confirm_tour_if_ready(&self, tour_id: &str) -> Result<Option<Tour>, BookingError> {
        let mut data = self.data.lock().await;
        let tour = data
            .tours
            .get_mut(tour_id)
            .ok_or(BookingError::TourNotFound)?;
        if !coordinator::should_confirm(tour) {
            return Ok(None);
        }
        tour.status = TourStatus::Confirmed;
        Ok(Some(tour.clone()))
    }

    async fn bookings_for_tour(&self, tour_id: &str) -> Result<Vec<Booking>, BookingError> {
        let data = self.data.lock().await;
        Ok(data
            .bookings
            .iter()
            .filter(|b| b.tour_id == tour_id)
            .cloned()
            .collect())
    }

    async fn tours_departing_on(&self, date: NaiveDate) -> Result<Vec<Tour>, BookingError> {
        let data = self.data.lock().await;
        let mut tours: Vec<Tour> = data
            .tours
            .values()
            .filter(|t| t.start_date == date)
            .cloned()
            .collect();
        tours.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(tours)
    }
}
