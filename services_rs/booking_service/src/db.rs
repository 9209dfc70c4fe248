use crate::domain::{
    self, Booking, BookingDraft, BookingStatus, Contact, DepositRate, PaymentEffect,
    PaymentProvider, PaymentRef, Tour, TourStatus,
};
use crate::error::BookingError;
use crate::store::{Store, MAX_CODE_ATTEMPTS};
use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use sqlx::postgres::{PgExecutor, PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use std::collections::HashMap;

const TOUR_COLS: &str = "id,title,destination,start_date,end_date,quantity,min_guests,\
current_guests,price_adult,price_child,status";

const BOOKING_COLS: &str = "id,code,tour_id,user_id,full_name,email,phone_number,address,\
num_adults,num_children,price_adult,price_child,total_price,deposit_rate,deposit_amount,\
paid_amount,deposit_paid,booking_status,payment_method,capacity_conflict,note,created_at,updated_at";

fn table_name(schema: &Option<String>, name: &str) -> String {
    match schema {
        Some(s) => format!("{s}.{name}"),
        None => name.to_string(),
    }
}

pub async fn connect(db_url: &str) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .connect(db_url)
        .await
}

pub async fn ensure_schema(pool: &PgPool, db_schema: &Option<String>) -> Result<(), sqlx::Error> {
    if let Some(schema) = db_schema {
        sqlx::query(&format!("CREATE SCHEMA IF NOT EXISTS {schema}"))
            .execute(pool)
            .await?;
    }

    let tours = table_name(db_schema, "tours");
    let bookings = table_name(db_schema, "bookings");
    let refs = table_name(db_schema, "booking_payment_refs");

    let ddls = [
        format!(
            "CREATE TABLE IF NOT EXISTS {tours} (\
             id VARCHAR(36) PRIMARY KEY,\
             title TEXT NOT NULL,\
             destination TEXT,\
             start_date DATE NOT NULL,\
             end_date DATE,\
             quantity INTEGER,\
             min_guests INTEGER NOT NULL DEFAULT 1,\
             current_guests INTEGER NOT NULL DEFAULT 0 CHECK (current_guests >= 0),\
             price_adult BIGINT NOT NULL,\
             price_child BIGINT,\
             status VARCHAR(16) NOT NULL DEFAULT 'pending'\
             )"
        ),
        format!(
            "CREATE TABLE IF NOT EXISTS {bookings} (\
             id VARCHAR(36) PRIMARY KEY,\
             code VARCHAR(16) NOT NULL UNIQUE,\
             tour_id VARCHAR(36) NOT NULL REFERENCES {tours}(id),\
             user_id VARCHAR(64) NOT NULL,\
             full_name TEXT,\
             email TEXT,\
             phone_number VARCHAR(32),\
             address TEXT,\
             num_adults INTEGER NOT NULL,\
             num_children INTEGER NOT NULL,\
             price_adult BIGINT NOT NULL,\
             price_child BIGINT NOT NULL,\
             total_price BIGINT NOT NULL,\
             deposit_rate DOUBLE PRECISION NOT NULL,\
             deposit_amount BIGINT NOT NULL,\
             paid_amount BIGINT NOT NULL DEFAULT 0,\
             deposit_paid BOOLEAN NOT NULL DEFAULT FALSE,\
             booking_status CHAR(1) NOT NULL DEFAULT 'p',\
             payment_method VARCHAR(16) NOT NULL,\
             capacity_conflict BOOLEAN NOT NULL DEFAULT FALSE,\
             note TEXT,\
             created_at TIMESTAMPTZ NOT NULL,\
             updated_at TIMESTAMPTZ NOT NULL\
             )"
        ),
        format!(
            "CREATE TABLE IF NOT EXISTS {refs} (\
             booking_id VARCHAR(36) NOT NULL REFERENCES {bookings}(id),\
             seq INTEGER NOT NULL,\
             provider VARCHAR(16) NOT NULL,\
             external_ref VARCHAR(128) NOT NULL,\
             amount BIGINT NOT NULL,\
             at TIMESTAMPTZ NOT NULL,\
             PRIMARY KEY (booking_id, seq),\
             UNIQUE (booking_id, provider, external_ref)\
             )"
        ),
        format!("CREATE INDEX IF NOT EXISTS idx_tours_start_date ON {tours}(start_date)"),
        format!(
            "CREATE INDEX IF NOT EXISTS idx_bookings_user_created ON {bookings}(user_id, created_at)"
        ),
        format!("CREATE INDEX IF NOT EXISTS idx_bookings_tour ON {bookings}(tour_id)"),
    ];

    for ddl in ddls {
        sqlx::query(&ddl).execute(pool).await?;
    }
    Ok(())
}

fn decode_err(msg: String) -> sqlx::Error {
    sqlx::Error::Decode(msg.into())
}

fn tour_from_row(row: &PgRow) -> Result<Tour, sqlx::Error> {
    let status: String = row.try_get("status")?;
    Ok(Tour {
        id: row.try_get("id")?,
        title: row.try_get("title")?,
        destination: row.try_get("destination")?,
        start_date: row.try_get("start_date")?,
        end_date: row.try_get("end_date")?,
        quantity: row.try_get("quantity")?,
        min_guests: row.try_get("min_guests")?,
        current_guests: row.try_get("current_guests")?,
        price_adult: row.try_get("price_adult")?,
        price_child: row.try_get("price_child")?,
        status: TourStatus::parse(&status)
            .ok_or_else(|| decode_err(format!("unknown tour status {status:?}")))?,
    })
}

fn booking_from_row(row: &PgRow) -> Result<Booking, sqlx::Error> {
    let status: String = row.try_get("booking_status")?;
    let method: String = row.try_get("payment_method")?;
    Ok(Booking {
        id: row.try_get("id")?,
        code: row.try_get("code")?,
        tour_id: row.try_get("tour_id")?,
        user_id: row.try_get("user_id")?,
        contact: Contact {
            full_name: row.try_get("full_name")?,
            email: row.try_get("email")?,
            phone_number: row.try_get("phone_number")?,
            address: row.try_get("address")?,
        },
        num_adults: row.try_get("num_adults")?,
        num_children: row.try_get("num_children")?,
        price_adult: row.try_get("price_adult")?,
        price_child: row.try_get("price_child")?,
        total_price: row.try_get("total_price")?,
        deposit_rate: row.try_get("deposit_rate")?,
        deposit_amount: row.try_get("deposit_amount")?,
        paid_amount: row.try_get("paid_amount")?,
        deposit_paid: row.try_get("deposit_paid")?,
        booking_status: BookingStatus::from_code(&status)
            .ok_or_else(|| decode_err(format!("unknown booking status {status:?}")))?,
        payment_method: PaymentProvider::parse(&method)
            .ok_or_else(|| decode_err(format!("unknown payment method {method:?}")))?,
        payment_refs: Vec::new(),
        capacity_conflict: row.try_get("capacity_conflict")?,
        note: row.try_get("note")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
    db_schema: Option<String>,
}

impl PgStore {
    pub fn new(pool: PgPool, db_schema: Option<String>) -> Self {
        Self { pool, db_schema }
    }

    fn table(&self, name: &str) -> String {
        table_name(&self.db_schema, name)
    }

    async fn attach_refs<'e, E>(&self, exec: E, bookings: &mut [Booking]) -> Result<(), sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        if bookings.is_empty() {
            return Ok(());
        }
        let refs = self.table("booking_payment_refs");
        let ids: Vec<String> = bookings.iter().map(|b| b.id.clone()).collect();
        let rows = sqlx::query(&format!(
            "SELECT booking_id,provider,external_ref,amount,at FROM {refs} \
             WHERE booking_id = ANY($1) ORDER BY booking_id, seq"
        ))
        .bind(ids)
        .fetch_all(exec)
        .await?;

        let mut by_booking: HashMap<String, Vec<PaymentRef>> = HashMap::new();
        for row in rows {
            let booking_id: String = row.try_get("booking_id")?;
            let provider: String = row.try_get("provider")?;
            by_booking.entry(booking_id).or_default().push(PaymentRef {
                provider: PaymentProvider::parse(&provider)
                    .ok_or_else(|| decode_err(format!("unknown provider {provider:?}")))?,
                external_ref: row.try_get("external_ref")?,
                amount: row.try_get("amount")?,
                at: row.try_get("at")?,
            });
        }
        for b in bookings.iter_mut() {
            b.payment_refs = by_booking.remove(&b.id).unwrap_or_default();
        }
        Ok(())
    }
}

#[async_trait]
impl Store for PgStore {
    async fn find_tour(&self, tour_id: &str) -> Result<Option<Tour>, BookingError> {
        let tours = self.table("tours");
        let row = sqlx::query(&format!("SELECT {TOUR_COLS} FROM {tours} WHERE id=$1"))
            .bind(tour_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(tour_from_row).transpose()?)
    }

    async fn create_booking(
        &self,
        draft: &BookingDraft,
        deposit_rate: DepositRate,
    ) -> Result<(Booking, Tour), BookingError> {
        let tours = self.table("tours");
        let bookings = self.table("bookings");

        let mut tx = self.pool.begin().await?;
        let row = sqlx::query(&format!(
            "SELECT {TOUR_COLS} FROM {tours} WHERE id=$1 FOR UPDATE"
        ))
        .bind(&draft.tour_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(BookingError::TourNotFound)?;
        let tour = tour_from_row(&row)?;

        let insert = format!(
            "INSERT INTO {bookings} ({BOOKING_COLS}) VALUES \
             ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14,$15,$16,$17,$18,$19,$20,$21,$22,$23) \
             ON CONFLICT (code) DO NOTHING"
        );
        for _ in 0..MAX_CODE_ATTEMPTS {
            let booking =
                domain::plan_booking(&tour, draft, deposit_rate, domain::generate_code(), Utc::now())?;
            let res = sqlx::query(&insert)
                .bind(&booking.id)
                .bind(&booking.code)
                .bind(&booking.tour_id)
                .bind(&booking.user_id)
                .bind(&booking.contact.full_name)
                .bind(&booking.contact.email)
                .bind(&booking.contact.phone_number)
                .bind(&booking.contact.address)
                .bind(booking.num_adults)
                .bind(booking.num_children)
                .bind(booking.price_adult)
                .bind(booking.price_child)
                .bind(booking.total_price)
                .bind(booking.deposit_rate)
                .bind(booking.deposit_amount)
                .bind(booking.paid_amount)
                .bind(booking.deposit_paid)
                .bind(booking.booking_status.code())
                .bind(booking.payment_method.as_str())
                .bind(booking.capacity_conflict)
                .bind(&booking.note)
                .bind(booking.created_at)
                .bind(booking.updated_at)
                .execute(&mut *tx)
                .await?;
            if res.rows_affected() == 1 {
                tx.commit().await?;
                return Ok((booking, tour));
            }
            tracing::warn!(code = %booking.code, "booking code collision, retrying");
        }
        Err(BookingError::Storage(
            "could not allocate a unique booking code".to_string(),
        ))
    }

    async fn find_booking(&self, code: &str) -> Result<Option<Booking>, BookingError> {
        let bookings = self.table("bookings");
        let row = sqlx::query(&format!("SELECT {BOOKING_COLS} FROM {bookings} WHERE code=$1"))
            .bind(code)
            .fetch_optional(&self.pool)
            .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        let mut found = [booking_from_row(&row)?];
        self.attach_refs(&self.pool, &mut found).await?;
        let [booking] = found;
        Ok(Some(booking))
    }

    async fn list_user_bookings(
        &self,
        user_id: &str,
        offset: i64,
        limit: i64,
    ) -> Result<(Vec<Booking>, i64), BookingError> {
        let bookings = self.table("bookings");
        let total: i64 = sqlx::query(&format!(
            "SELECT COUNT(*) AS n FROM {bookings} WHERE user_id=$1"
        ))
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?
        .try_get("n")?;

        let rows = sqlx::query(&format!(
            "SELECT {BOOKING_COLS} FROM {bookings} WHERE user_id=$1 \
             ORDER BY created_at DESC LIMIT $2 OFFSET $3"
        ))
        .bind(user_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        let mut page = rows
            .iter()
            .map(booking_from_row)
            .collect::<Result<Vec<_>, _>>()?;
        self.attach_refs(&self.pool, &mut page).await?;
        Ok((page, total))
    }

    async fn cancel_booking(&self, code: &str, user_id: &str) -> Result<Booking, BookingError> {
        let bookings = self.table("bookings");
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query(&format!(
            "SELECT {BOOKING_COLS} FROM {bookings} WHERE code=$1 AND user_id=$2 FOR UPDATE"
        ))
        .bind(code)
        .bind(user_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(BookingError::BookingNotFound)?;
        let mut found = [booking_from_row(&row)?];
        self.attach_refs(&mut *tx, &mut found).await?;
        let [mut booking] = found;

        booking.cancel_by_user(Utc::now())?;
        sqlx::query(&format!(
            "UPDATE {bookings} SET booking_status=$1, updated_at=$2 WHERE id=$3"
        ))
        .bind(booking.booking_status.code())
        .bind(booking.updated_at)
        .bind(&booking.id)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(booking)
    }

    async fn settle_payment(
        &self,
        code: &str,
        payment: PaymentRef,
    ) -> Result<(Booking, PaymentEffect), BookingError> {
        let tours = self.table("tours");
        let bookings = self.table("bookings");
        let refs = self.table("booking_payment_refs");

        let mut tx = self.pool.begin().await?;
        let row = sqlx::query(&format!(
            "SELECT {BOOKING_COLS} FROM {bookings} WHERE code=$1 FOR UPDATE"
        ))
        .bind(code)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(BookingError::BookingNotFound)?;
        let mut found = [booking_from_row(&row)?];
        self.attach_refs(&mut *tx, &mut found).await?;
        let [mut booking] = found;

        let row = sqlx::query(&format!(
            "SELECT {TOUR_COLS} FROM {tours} WHERE id=$1 FOR UPDATE"
        ))
        .bind(&booking.tour_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(BookingError::TourNotFound)?;
        let mut tour = tour_from_row(&row)?;
        let guests_before = tour.current_guests;

        let effect = domain::settle_payment(&mut booking, &mut tour, payment)?;
        if effect == PaymentEffect::AlreadyProcessed {
            tx.rollback().await?;
            return Ok((booking, effect));
        }

        let seq = booking.payment_refs.len() as i32 - 1;
        if let Some(applied) = booking.payment_refs.last() {
            sqlx::query(&format!(
                "INSERT INTO {refs} (booking_id,seq,provider,external_ref,amount,at) \
                 VALUES ($1,$2,$3,$4,$5,$6)"
            ))
            .bind(&booking.id)
            .bind(seq)
            .bind(applied.provider.as_str())
            .bind(&applied.external_ref)
            .bind(applied.amount)
            .bind(applied.at)
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query(&format!(
            "UPDATE {bookings} SET paid_amount=$1, deposit_paid=$2, booking_status=$3, \
             capacity_conflict=$4, updated_at=$5 WHERE id=$6"
        ))
        .bind(booking.paid_amount)
        .bind(booking.deposit_paid)
        .bind(booking.booking_status.code())
        .bind(booking.capacity_conflict)
        .bind(booking.updated_at)
        .bind(&booking.id)
        .execute(&mut *tx)
        .await?;

        if tour.current_guests != guests_before {
            sqlx::query(&format!("UPDATE {tours} SET current_guests=$1 WHERE id=$2"))
                .bind(tour.current_guests)
                .bind(&tour.id)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok((booking, effect))
    }

    async fn confirm_tour_if_ready(&self, tour_id: &str) -> Result<Option<Tour>, BookingError> {
        let tours = self.table("tours");
        // Mirrors coordinator::should_confirm; the conditional update makes it idempotent.
        let row = sqlx::query(&format!(
            "UPDATE {tours} SET status=$1 \
             WHERE id=$2 AND status=$3 AND current_guests >= min_guests \
             RETURNING {TOUR_COLS}"
        ))
        .bind(TourStatus::Confirmed.as_str())
        .bind(tour_id)
        .bind(TourStatus::Pending.as_str())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(tour_from_row).transpose()?)
    }

    async fn bookings_for_tour(&self, tour_id: &str) -> Result<Vec<Booking>, BookingError> {
        let bookings = self.table("bookings");
        let rows = sqlx::query(&format!(
            "SELECT {BOOKING_COLS} FROM {bookings} WHERE tour_id=$1 ORDER BY created_at"
        ))
        .bind(tour_id)
        .fetch_all(&self.pool)
        .await?;
        let mut out = rows
            .iter()
            .map(booking_from_row)
            .collect::<Result<Vec<_>, _>>()?;
        self.attach_refs(&self.pool, &mut out).await?;
        Ok(out)
    }

    async fn tours_departing_on(&self, date: NaiveDate) -> Result<Vec<Tour>, BookingError> {
        let tours = self.table("tours");
        let rows = sqlx::query(&format!(
            "SELECT {TOUR_COLS} FROM {tours} WHERE start_date=$1 ORDER BY id"
        ))
        .bind(date)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .iter()
            .map(tour_from_row)
            .collect::<Result<Vec<_>, _>>()?)
    }
}
