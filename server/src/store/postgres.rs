//! `PostgreSQL` implementation of both storage traits.
//!
//! Lifecycle transitions are conditional `UPDATE`s: the `WHERE` clause carries
//! the guard (`closeout_phase`, `claim_token`, `locked`), and zero affected rows
//! means the guard failed. Only then is the row re-read, to report *why* the
//! transition was refused. Claim and release share a transaction with the
//! deletion of the event's unclosed payout runs.
//!
//! # Example
//!
//! ```ignore
//! let store = PostgresStore::connect(&config.postgres).await?;
//! store.migrate().await?;
//! ```

use crate::config::PostgresConfig;
use crate::error::ServerError;
use chrono::{DateTime, Duration, Utc};
use closeout_core::error::{ConflictReason, StoreError};
use closeout_core::lifecycle::{ClaimToken, CloseoutPhase, TransitionError};
use closeout_core::payout::PayoutBreakdown;
use closeout_core::rules::{CommissionContract, ContractTerms};
use closeout_core::store::{CloseoutStore, StoreFuture, TableBookingStore};
use closeout_core::table_spend::{PromoterRateRule, PromoterTableTerms, TableCommissionType};
use closeout_core::types::{
    AttributedCheckIn, BookingStatus, CheckIn, CheckInId, CloseoutRecord, ContractId, Event,
    EventId, Money, PaymentStatus, PayoutLine, PayoutLineId, PayoutRun, PayoutRunId, Percentage,
    PromoterId, RegistrationId, SpendSource, TableBooking, TableBookingCommission, TableBookingId,
    TableCommissionId, UserId,
};
use rust_decimal::Decimal;
use sqlx::postgres::PgPoolOptions;
use sqlx::types::Json;
use sqlx::PgPool;
use uuid::Uuid;

macro_rules! event_columns {
    () => {
        "id, name, closeout_phase, claim_token, claimed_at, closed_at, closed_by, locked_at, \
         closeout_notes, total_revenue, payout_run_id, venue_commission_rate"
    };
}

macro_rules! line_columns {
    () => {
        "id, payout_run_id, event_id, promoter_id, checkins_count, actual_checkins, \
         checkins_override_reason, commission_amount, breakdown, payment_status, created_at"
    };
}

macro_rules! booking_columns {
    () => {
        "id, event_id, promoter_id, status, actual_spend, minimum_spend, closeout_locked"
    };
}

macro_rules! commission_columns {
    () => {
        "id, booking_id, event_id, promoter_id, spend_amount, spend_source, \
         promoter_commission_amount, venue_commission_amount, venue_commission_rate, \
         promoter_rule, locked, created_at, updated_at"
    };
}

/// `PostgreSQL`-backed closeout and table-booking store.
#[derive(Clone, Debug)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Wrap an existing pool.
    #[must_use]
    pub const fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Open a connection pool.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Database`] if the database cannot be reached.
    pub async fn connect(config: &PostgresConfig) -> Result<Self, ServerError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(std::time::Duration::from_secs(config.connect_timeout))
            .idle_timeout(std::time::Duration::from_secs(config.idle_timeout))
            .connect(&config.url)
            .await?;
        Ok(Self { pool })
    }

    /// Run the embedded migrations.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Migration`] if a migration fails.
    pub async fn migrate(&self) -> Result<(), ServerError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    /// The underlying pool
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn fetch_event(&self, event_id: EventId) -> Result<Event, StoreError> {
        let row: Option<EventRow> =
            sqlx::query_as(concat!("SELECT ", event_columns!(), " FROM events WHERE id = $1"))
                .bind(event_id.as_uuid())
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| db_error("Failed to load event", &e))?;
        row.ok_or_else(|| StoreError::not_found("Event", event_id))?
            .try_into()
    }

    /// Explain a refused transition by replaying it against the current row.
    async fn refused(
        &self,
        event_id: EventId,
        replay: impl FnOnce(&CloseoutPhase) -> Result<CloseoutPhase, TransitionError>,
        raced: TransitionError,
    ) -> StoreError {
        match self.fetch_event(event_id).await {
            Ok(event) => match replay(&event.closeout_phase) {
                Err(refusal) => refusal.into(),
                // The row changed between the UPDATE and the re-read.
                Ok(_) => raced.into(),
            },
            Err(error) => error,
        }
    }
}

fn db_error(context: &str, error: &sqlx::Error) -> StoreError {
    StoreError::Database(format!("{context}: {error}"))
}

/// Delete the payout runs of an event that is not closed; lines cascade.
async fn discard_runs(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    event_id: EventId,
) -> Result<(), StoreError> {
    let result = sqlx::query("DELETE FROM payout_runs WHERE event_id = $1")
        .bind(event_id.as_uuid())
        .execute(&mut **tx)
        .await
        .map_err(|e| db_error("Failed to discard payout runs", &e))?;
    if result.rows_affected() > 0 {
        tracing::warn!(
            event_id = %event_id,
            discarded = result.rows_affected(),
            "Discarded payout runs of an unfinished closeout"
        );
    }
    Ok(())
}

fn count_to_db(count: u32) -> Result<i32, StoreError> {
    i32::try_from(count).map_err(|_| StoreError::Serialization(format!("count {count} overflows")))
}

fn count_from_db(count: i32) -> Result<u32, StoreError> {
    u32::try_from(count)
        .map_err(|_| StoreError::Serialization(format!("negative count {count} in database")))
}

fn unknown(column: &str, value: &str) -> StoreError {
    StoreError::Serialization(format!("unknown {column} '{value}'"))
}

// ============================================================================
// Rows
// ============================================================================

#[derive(sqlx::FromRow)]
struct EventRow {
    id: Uuid,
    name: String,
    closeout_phase: String,
    claim_token: Option<Uuid>,
    claimed_at: Option<DateTime<Utc>>,
    closed_at: Option<DateTime<Utc>>,
    closed_by: Option<Uuid>,
    locked_at: Option<DateTime<Utc>>,
    closeout_notes: Option<String>,
    total_revenue: Option<Decimal>,
    payout_run_id: Option<Uuid>,
    venue_commission_rate: Option<Decimal>,
}

impl TryFrom<EventRow> for Event {
    type Error = StoreError;

    fn try_from(row: EventRow) -> Result<Self, Self::Error> {
        let closeout_phase = match (
            row.closeout_phase.as_str(),
            row.claim_token,
            row.claimed_at,
            row.closed_at,
        ) {
            ("open", ..) => CloseoutPhase::Open,
            ("finalizing", Some(claim), Some(claimed_at), _) => CloseoutPhase::Finalizing {
                claim: ClaimToken::from_uuid(claim),
                claimed_at,
            },
            ("closed", _, _, Some(closed_at)) => CloseoutPhase::Closed { closed_at },
            (phase, ..) => {
                return Err(StoreError::Serialization(format!(
                    "event {} has inconsistent closeout phase '{phase}'",
                    row.id
                )));
            }
        };

        Ok(Self {
            id: EventId::from_uuid(row.id),
            name: row.name,
            closeout_phase,
            closed_by: row.closed_by.map(UserId::from_uuid),
            locked_at: row.locked_at,
            closeout_notes: row.closeout_notes,
            total_revenue: row.total_revenue.map(Money::new),
            payout_run_id: row.payout_run_id.map(PayoutRunId::from_uuid),
            venue_commission_rate: row.venue_commission_rate.map(Percentage::new),
        })
    }
}

#[derive(sqlx::FromRow)]
struct ContractRow {
    id: Uuid,
    event_id: Uuid,
    promoter_id: Uuid,
    terms: Json<ContractTerms>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<ContractRow> for CommissionContract {
    fn from(row: ContractRow) -> Self {
        Self {
            id: ContractId::from_uuid(row.id),
            event_id: EventId::from_uuid(row.event_id),
            promoter_id: PromoterId::from_uuid(row.promoter_id),
            terms: row.terms.0,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct CheckInRow {
    id: Uuid,
    registration_id: Uuid,
    checked_in_at: DateTime<Utc>,
    undo_at: Option<DateTime<Utc>>,
    referred_by_promoter_id: Option<Uuid>,
}

impl From<CheckInRow> for AttributedCheckIn {
    fn from(row: CheckInRow) -> Self {
        Self {
            check_in: CheckIn {
                id: CheckInId::from_uuid(row.id),
                registration_id: RegistrationId::from_uuid(row.registration_id),
                checked_in_at: row.checked_in_at,
                undo_at: row.undo_at,
            },
            referred_by: row.referred_by_promoter_id.map(PromoterId::from_uuid),
        }
    }
}

#[derive(sqlx::FromRow)]
struct RunRow {
    id: Uuid,
    event_id: Uuid,
    created_by: Uuid,
    created_at: DateTime<Utc>,
    statement_ref: Option<String>,
}

impl From<RunRow> for PayoutRun {
    fn from(row: RunRow) -> Self {
        Self {
            id: PayoutRunId::from_uuid(row.id),
            event_id: EventId::from_uuid(row.event_id),
            created_by: UserId::from_uuid(row.created_by),
            created_at: row.created_at,
            statement_ref: row.statement_ref,
        }
    }
}

#[derive(sqlx::FromRow)]
struct LineRow {
    id: Uuid,
    payout_run_id: Uuid,
    event_id: Uuid,
    promoter_id: Uuid,
    checkins_count: i32,
    actual_checkins: i32,
    checkins_override_reason: Option<String>,
    commission_amount: Decimal,
    breakdown: Json<PayoutBreakdown>,
    payment_status: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<LineRow> for PayoutLine {
    type Error = StoreError;

    fn try_from(row: LineRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: PayoutLineId::from_uuid(row.id),
            payout_run_id: PayoutRunId::from_uuid(row.payout_run_id),
            event_id: EventId::from_uuid(row.event_id),
            promoter_id: PromoterId::from_uuid(row.promoter_id),
            checkins_count: count_from_db(row.checkins_count)?,
            actual_checkins: count_from_db(row.actual_checkins)?,
            checkins_override_reason: row.checkins_override_reason,
            commission_amount: Money::new(row.commission_amount),
            breakdown: row.breakdown.0,
            payment_status: PaymentStatus::parse(&row.payment_status)
                .ok_or_else(|| unknown("payment_status", &row.payment_status))?,
            created_at: row.created_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct BookingRow {
    id: Uuid,
    event_id: Uuid,
    promoter_id: Option<Uuid>,
    status: String,
    actual_spend: Option<Decimal>,
    minimum_spend: Option<Decimal>,
    closeout_locked: bool,
}

impl TryFrom<BookingRow> for TableBooking {
    type Error = StoreError;

    fn try_from(row: BookingRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: TableBookingId::from_uuid(row.id),
            event_id: EventId::from_uuid(row.event_id),
            promoter_id: row.promoter_id.map(PromoterId::from_uuid),
            status: BookingStatus::parse(&row.status).ok_or_else(|| unknown("status", &row.status))?,
            actual_spend: row.actual_spend.map(Money::new),
            minimum_spend: row.minimum_spend.map(Money::new),
            closeout_locked: row.closeout_locked,
        })
    }
}

#[derive(sqlx::FromRow)]
struct PromoterTermsRow {
    table_commission_type: Option<String>,
    table_flat_fee: Option<Decimal>,
    table_commission_rate: Option<Decimal>,
    commission_rate: Option<Decimal>,
}

impl TryFrom<PromoterTermsRow> for PromoterTableTerms {
    type Error = StoreError;

    fn try_from(row: PromoterTermsRow) -> Result<Self, Self::Error> {
        let table_commission_type = row
            .table_commission_type
            .as_deref()
            .map(|raw| {
                TableCommissionType::parse(raw).ok_or_else(|| unknown("table_commission_type", raw))
            })
            .transpose()?;
        Ok(Self {
            table_commission_type,
            table_flat_fee: row.table_flat_fee.map(Money::new),
            table_commission_rate: row.table_commission_rate.map(Percentage::new),
            commission_rate: row.commission_rate.map(Percentage::new),
        })
    }
}

#[derive(sqlx::FromRow)]
struct CommissionRow {
    id: Uuid,
    booking_id: Uuid,
    event_id: Uuid,
    promoter_id: Option<Uuid>,
    spend_amount: Decimal,
    spend_source: String,
    promoter_commission_amount: Decimal,
    venue_commission_amount: Decimal,
    venue_commission_rate: Decimal,
    promoter_rule: String,
    locked: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<CommissionRow> for TableBookingCommission {
    type Error = StoreError;

    fn try_from(row: CommissionRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: TableCommissionId::from_uuid(row.id),
            booking_id: TableBookingId::from_uuid(row.booking_id),
            event_id: EventId::from_uuid(row.event_id),
            promoter_id: row.promoter_id.map(PromoterId::from_uuid),
            spend_amount: Money::new(row.spend_amount),
            spend_source: SpendSource::parse(&row.spend_source)
                .ok_or_else(|| unknown("spend_source", &row.spend_source))?,
            promoter_commission_amount: Money::new(row.promoter_commission_amount),
            venue_commission_amount: Money::new(row.venue_commission_amount),
            venue_commission_rate: Percentage::new(row.venue_commission_rate),
            promoter_rule: PromoterRateRule::parse(&row.promoter_rule)
                .ok_or_else(|| unknown("promoter_rule", &row.promoter_rule))?,
            locked: row.locked,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

// ============================================================================
// CloseoutStore
// ============================================================================

impl CloseoutStore for PostgresStore {
    fn get_event(&self, event_id: EventId) -> StoreFuture<'_, Event> {
        Box::pin(self.fetch_event(event_id))
    }

    fn claim_closeout(
        &self,
        event_id: EventId,
        claim: ClaimToken,
        now: DateTime<Utc>,
        claim_ttl: Duration,
    ) -> StoreFuture<'_, Event> {
        Box::pin(async move {
            let mut tx = self
                .pool
                .begin()
                .await
                .map_err(|e| db_error("Failed to begin transaction", &e))?;

            let row: Option<EventRow> = sqlx::query_as(concat!(
                "UPDATE events
                 SET closeout_phase = 'finalizing', claim_token = $2, claimed_at = $3
                 WHERE id = $1
                   AND (closeout_phase = 'open'
                        OR (closeout_phase = 'finalizing' AND claimed_at <= $4))
                 RETURNING ",
                event_columns!()
            ))
            .bind(event_id.as_uuid())
            .bind(claim.as_uuid())
            .bind(now)
            .bind(now - claim_ttl)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| db_error("Failed to claim event", &e))?;

            match row {
                Some(row) => {
                    discard_runs(&mut tx, event_id).await?;
                    tx.commit()
                        .await
                        .map_err(|e| db_error("Failed to commit claim", &e))?;
                    row.try_into()
                }
                None => {
                    drop(tx);
                    Err(self
                        .refused(
                            event_id,
                            |phase| phase.claim(claim, now, claim_ttl),
                            TransitionError::InProgress { claimed_at: now },
                        )
                        .await)
                }
            }
        })
    }

    fn release_closeout(&self, event_id: EventId, claim: ClaimToken) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            let mut tx = self
                .pool
                .begin()
                .await
                .map_err(|e| db_error("Failed to begin transaction", &e))?;

            let result = sqlx::query(
                "UPDATE events
                 SET closeout_phase = 'open', claim_token = NULL, claimed_at = NULL
                 WHERE id = $1 AND closeout_phase = 'finalizing' AND claim_token = $2",
            )
            .bind(event_id.as_uuid())
            .bind(claim.as_uuid())
            .execute(&mut *tx)
            .await
            .map_err(|e| db_error("Failed to release claim", &e))?;

            if result.rows_affected() == 1 {
                discard_runs(&mut tx, event_id).await?;
                return tx
                    .commit()
                    .await
                    .map_err(|e| db_error("Failed to commit release", &e));
            }
            drop(tx);
            Err(self
                .refused(
                    event_id,
                    |phase| phase.release(claim),
                    TransitionError::ClaimLost { claim },
                )
                .await)
        })
    }

    fn close_event(
        &self,
        event_id: EventId,
        claim: ClaimToken,
        record: CloseoutRecord,
    ) -> StoreFuture<'_, Event> {
        Box::pin(async move {
            let row: Option<EventRow> = sqlx::query_as(concat!(
                "UPDATE events
                 SET closeout_phase = 'closed', claim_token = NULL, claimed_at = NULL,
                     closed_at = $3, locked_at = $3, closed_by = $4, closeout_notes = $5,
                     total_revenue = $6, payout_run_id = $7
                 WHERE id = $1 AND closeout_phase = 'finalizing' AND claim_token = $2
                 RETURNING ",
                event_columns!()
            ))
            .bind(event_id.as_uuid())
            .bind(claim.as_uuid())
            .bind(record.closed_at)
            .bind(record.closed_by.as_uuid())
            .bind(record.closeout_notes.as_deref())
            .bind(record.total_revenue.map(|amount| amount.amount()))
            .bind(record.payout_run_id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_error("Failed to close event", &e))?;

            match row {
                Some(row) => row.try_into(),
                None => Err(self
                    .refused(
                        event_id,
                        |phase| phase.close(claim, record.closed_at),
                        TransitionError::ClaimLost { claim },
                    )
                    .await),
            }
        })
    }

    fn list_contracts(&self, event_id: EventId) -> StoreFuture<'_, Vec<CommissionContract>> {
        Box::pin(async move {
            let rows: Vec<ContractRow> = sqlx::query_as(
                "SELECT id, event_id, promoter_id, terms, created_at, updated_at
                 FROM event_promoter_contracts
                 WHERE event_id = $1
                 ORDER BY created_at, promoter_id",
            )
            .bind(event_id.as_uuid())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| db_error("Failed to list contracts", &e))?;
            Ok(rows.into_iter().map(Into::into).collect())
        })
    }

    fn upsert_contract(
        &self,
        contract: CommissionContract,
    ) -> StoreFuture<'_, CommissionContract> {
        Box::pin(async move {
            let mut tx = self
                .pool
                .begin()
                .await
                .map_err(|e| db_error("Failed to begin transaction", &e))?;

            let lock: Option<(Option<DateTime<Utc>>, String)> = sqlx::query_as(
                "SELECT locked_at, closeout_phase FROM events WHERE id = $1 FOR UPDATE",
            )
            .bind(contract.event_id.as_uuid())
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| db_error("Failed to lock event", &e))?;

            match lock {
                None => return Err(StoreError::not_found("Event", contract.event_id)),
                Some((locked_at, phase)) if locked_at.is_some() || phase == "closed" => {
                    return Err(StoreError::conflict(
                        ConflictReason::EventLocked,
                        format!("event {} is locked", contract.event_id),
                    ));
                }
                Some((_, phase)) if phase == "finalizing" => {
                    return Err(StoreError::conflict(
                        ConflictReason::FinalizeInProgress,
                        format!("event {} is being finalized", contract.event_id),
                    ));
                }
                Some(_) => {}
            }

            let row: ContractRow = sqlx::query_as(
                "INSERT INTO event_promoter_contracts
                     (id, event_id, promoter_id, terms, created_at, updated_at)
                 VALUES ($1, $2, $3, $4, $5, $6)
                 ON CONFLICT (event_id, promoter_id)
                 DO UPDATE SET terms = EXCLUDED.terms, updated_at = EXCLUDED.updated_at
                 RETURNING id, event_id, promoter_id, terms, created_at, updated_at",
            )
            .bind(contract.id.as_uuid())
            .bind(contract.event_id.as_uuid())
            .bind(contract.promoter_id.as_uuid())
            .bind(Json(&contract.terms))
            .bind(contract.created_at)
            .bind(contract.updated_at)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| db_error("Failed to save contract", &e))?;

            tx.commit()
                .await
                .map_err(|e| db_error("Failed to commit contract", &e))?;
            Ok(row.into())
        })
    }

    fn list_checkins(&self, event_id: EventId) -> StoreFuture<'_, Vec<AttributedCheckIn>> {
        Box::pin(async move {
            let rows: Vec<CheckInRow> = sqlx::query_as(
                "SELECT c.id, c.registration_id, c.checked_in_at, c.undo_at,
                        r.referred_by_promoter_id
                 FROM check_ins c
                 JOIN registrations r ON r.id = c.registration_id
                 WHERE r.event_id = $1
                 ORDER BY c.checked_in_at",
            )
            .bind(event_id.as_uuid())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| db_error("Failed to list check-ins", &e))?;
            Ok(rows.into_iter().map(Into::into).collect())
        })
    }

    fn create_payout_run(&self, run: PayoutRun, claim: ClaimToken) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            let mut tx = self
                .pool
                .begin()
                .await
                .map_err(|e| db_error("Failed to begin transaction", &e))?;

            // FOR SHARE blocks a concurrent takeover until the run is committed,
            // so the takeover's cleanup sees it.
            let held: Option<(Uuid,)> = sqlx::query_as(
                "SELECT id FROM events
                 WHERE id = $1 AND closeout_phase = 'finalizing' AND claim_token = $2
                 FOR SHARE",
            )
            .bind(run.event_id.as_uuid())
            .bind(claim.as_uuid())
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| db_error("Failed to check closeout claim", &e))?;
            if held.is_none() {
                return Err(TransitionError::ClaimLost { claim }.into());
            }

            sqlx::query(
                "INSERT INTO payout_runs (id, event_id, created_by, created_at, statement_ref)
                 VALUES ($1, $2, $3, $4, $5)",
            )
            .bind(run.id.as_uuid())
            .bind(run.event_id.as_uuid())
            .bind(run.created_by.as_uuid())
            .bind(run.created_at)
            .bind(run.statement_ref.as_deref())
            .execute(&mut *tx)
            .await
            .map_err(|e| db_error("Failed to create payout run", &e))?;

            tx.commit()
                .await
                .map_err(|e| db_error("Failed to commit payout run", &e))
        })
    }

    fn insert_payout_line(&self, line: PayoutLine) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            sqlx::query(
                "INSERT INTO payout_lines
                     (id, payout_run_id, event_id, promoter_id, checkins_count, actual_checkins,
                      checkins_override_reason, commission_amount, breakdown, payment_status,
                      created_at)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
            )
            .bind(line.id.as_uuid())
            .bind(line.payout_run_id.as_uuid())
            .bind(line.event_id.as_uuid())
            .bind(line.promoter_id.as_uuid())
            .bind(count_to_db(line.checkins_count)?)
            .bind(count_to_db(line.actual_checkins)?)
            .bind(line.checkins_override_reason.as_deref())
            .bind(line.commission_amount.amount())
            .bind(Json(&line.breakdown))
            .bind(line.payment_status.as_str())
            .bind(line.created_at)
            .execute(&self.pool)
            .await
            .map_err(|e| db_error("Failed to insert payout line", &e))?;
            Ok(())
        })
    }

    fn attach_statement(&self, run_id: PayoutRunId, statement_ref: String) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            let result = sqlx::query("UPDATE payout_runs SET statement_ref = $2 WHERE id = $1")
                .bind(run_id.as_uuid())
                .bind(&statement_ref)
                .execute(&self.pool)
                .await
                .map_err(|e| db_error("Failed to attach statement", &e))?;
            if result.rows_affected() == 0 {
                return Err(StoreError::not_found("PayoutRun", run_id));
            }
            Ok(())
        })
    }

    fn get_payout_run(&self, run_id: PayoutRunId) -> StoreFuture<'_, PayoutRun> {
        Box::pin(async move {
            let row: Option<RunRow> = sqlx::query_as(
                "SELECT id, event_id, created_by, created_at, statement_ref
                 FROM payout_runs WHERE id = $1",
            )
            .bind(run_id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_error("Failed to load payout run", &e))?;
            row.map(Into::into)
                .ok_or_else(|| StoreError::not_found("PayoutRun", run_id))
        })
    }

    fn list_payout_lines(&self, run_id: PayoutRunId) -> StoreFuture<'_, Vec<PayoutLine>> {
        Box::pin(async move {
            let rows: Vec<LineRow> = sqlx::query_as(concat!(
                "SELECT ",
                line_columns!(),
                " FROM payout_lines WHERE payout_run_id = $1 ORDER BY created_at, promoter_id"
            ))
            .bind(run_id.as_uuid())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| db_error("Failed to list payout lines", &e))?;
            rows.into_iter().map(TryInto::try_into).collect()
        })
    }

    fn count_payout_runs(&self, event_id: EventId) -> StoreFuture<'_, u64> {
        Box::pin(async move {
            let (count,): (i64,) =
                sqlx::query_as("SELECT COUNT(*) FROM payout_runs WHERE event_id = $1")
                    .bind(event_id.as_uuid())
                    .fetch_one(&self.pool)
                    .await
                    .map_err(|e| db_error("Failed to count payout runs", &e))?;
            u64::try_from(count)
                .map_err(|_| StoreError::Serialization(format!("negative run count {count}")))
        })
    }
}

// ============================================================================
// TableBookingStore
// ============================================================================

impl TableBookingStore for PostgresStore {
    fn list_table_bookings(&self, event_id: EventId) -> StoreFuture<'_, Vec<TableBooking>> {
        Box::pin(async move {
            let rows: Vec<BookingRow> = sqlx::query_as(concat!(
                "SELECT ",
                booking_columns!(),
                " FROM table_bookings WHERE event_id = $1 ORDER BY id"
            ))
            .bind(event_id.as_uuid())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| db_error("Failed to list table bookings", &e))?;
            rows.into_iter().map(TryInto::try_into).collect()
        })
    }

    fn get_table_booking(&self, booking_id: TableBookingId) -> StoreFuture<'_, TableBooking> {
        Box::pin(async move {
            let row: Option<BookingRow> = sqlx::query_as(concat!(
                "SELECT ",
                booking_columns!(),
                " FROM table_bookings WHERE id = $1"
            ))
            .bind(booking_id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_error("Failed to load table booking", &e))?;
            row.ok_or_else(|| StoreError::not_found("TableBooking", booking_id))?
                .try_into()
        })
    }

    fn get_promoter_table_terms(
        &self,
        promoter_id: PromoterId,
    ) -> StoreFuture<'_, Option<PromoterTableTerms>> {
        Box::pin(async move {
            let row: Option<PromoterTermsRow> = sqlx::query_as(
                "SELECT table_commission_type, table_flat_fee, table_commission_rate,
                        commission_rate
                 FROM promoters WHERE id = $1",
            )
            .bind(promoter_id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_error("Failed to load promoter terms", &e))?;
            row.map(TryInto::try_into).transpose()
        })
    }

    fn get_table_commission(
        &self,
        booking_id: TableBookingId,
    ) -> StoreFuture<'_, Option<TableBookingCommission>> {
        Box::pin(async move {
            let row: Option<CommissionRow> = sqlx::query_as(concat!(
                "SELECT ",
                commission_columns!(),
                " FROM table_booking_commissions WHERE booking_id = $1"
            ))
            .bind(booking_id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_error("Failed to load table commission", &e))?;
            row.map(TryInto::try_into).transpose()
        })
    }

    fn insert_table_commission(&self, record: TableBookingCommission) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            sqlx::query(concat!(
                "INSERT INTO table_booking_commissions (",
                commission_columns!(),
                ") VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)"
            ))
            .bind(record.id.as_uuid())
            .bind(record.booking_id.as_uuid())
            .bind(record.event_id.as_uuid())
            .bind(record.promoter_id.map(|id| *id.as_uuid()))
            .bind(record.spend_amount.amount())
            .bind(record.spend_source.as_str())
            .bind(record.promoter_commission_amount.amount())
            .bind(record.venue_commission_amount.amount())
            .bind(record.venue_commission_rate.value())
            .bind(record.promoter_rule.as_str())
            .bind(record.locked)
            .bind(record.created_at)
            .bind(record.updated_at)
            .execute(&self.pool)
            .await
            .map_err(|e| match &e {
                sqlx::Error::Database(db) if db.is_unique_violation() => StoreError::conflict(
                    ConflictReason::DuplicateRecord,
                    format!("booking {} already has a commission record", record.booking_id),
                ),
                _ => db_error("Failed to insert table commission", &e),
            })?;
            Ok(())
        })
    }

    fn update_table_commission(&self, record: TableBookingCommission) -> StoreFuture<'_, bool> {
        Box::pin(async move {
            let result = sqlx::query(
                "UPDATE table_booking_commissions
                 SET promoter_id = $2, spend_amount = $3, spend_source = $4,
                     promoter_commission_amount = $5, venue_commission_amount = $6,
                     venue_commission_rate = $7, promoter_rule = $8, updated_at = $9
                 WHERE booking_id = $1 AND locked = false",
            )
            .bind(record.booking_id.as_uuid())
            .bind(record.promoter_id.map(|id| *id.as_uuid()))
            .bind(record.spend_amount.amount())
            .bind(record.spend_source.as_str())
            .bind(record.promoter_commission_amount.amount())
            .bind(record.venue_commission_amount.amount())
            .bind(record.venue_commission_rate.value())
            .bind(record.promoter_rule.as_str())
            .bind(record.updated_at)
            .execute(&self.pool)
            .await
            .map_err(|e| db_error("Failed to update table commission", &e))?;

            if result.rows_affected() == 1 {
                return Ok(true);
            }
            let exists: Option<(bool,)> = sqlx::query_as(
                "SELECT locked FROM table_booking_commissions WHERE booking_id = $1",
            )
            .bind(record.booking_id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_error("Failed to load table commission", &e))?;
            match exists {
                Some(_) => Ok(false),
                None => Err(StoreError::not_found("TableBookingCommission", record.booking_id)),
            }
        })
    }

    fn record_booking_payment(
        &self,
        booking_id: TableBookingId,
        amount_paid: Money,
    ) -> StoreFuture<'_, TableBooking> {
        Box::pin(async move {
            let row: Option<BookingRow> = sqlx::query_as(concat!(
                "UPDATE table_bookings
                 SET status = CASE WHEN status = 'completed' THEN status ELSE 'confirmed' END,
                     actual_spend = COALESCE(actual_spend, 0) + $2
                 WHERE id = $1 AND closeout_locked = false
                 RETURNING ",
                booking_columns!()
            ))
            .bind(booking_id.as_uuid())
            .bind(amount_paid.amount())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_error("Failed to record booking payment", &e))?;

            match row {
                Some(row) => row.try_into(),
                None => {
                    // Either missing or closeout-locked.
                    self.get_table_booking(booking_id).await?;
                    Err(StoreError::conflict(
                        ConflictReason::CommissionLocked,
                        format!("table booking {booking_id} is locked for closeout"),
                    ))
                }
            }
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn event_row(phase: &str) -> EventRow {
        EventRow {
            id: Uuid::new_v4(),
            name: "Warehouse Night".to_string(),
            closeout_phase: phase.to_string(),
            claim_token: None,
            claimed_at: None,
            closed_at: None,
            closed_by: None,
            locked_at: None,
            closeout_notes: None,
            total_revenue: None,
            payout_run_id: None,
            venue_commission_rate: None,
        }
    }

    #[test]
    fn finalizing_row_decodes_its_claim() {
        let token = Uuid::new_v4();
        let at = Utc::now();
        let row = EventRow {
            claim_token: Some(token),
            claimed_at: Some(at),
            ..event_row("finalizing")
        };
        let event = Event::try_from(row).unwrap();
        assert_eq!(
            event.closeout_phase,
            CloseoutPhase::Finalizing {
                claim: ClaimToken::from_uuid(token),
                claimed_at: at
            }
        );
    }

    #[test]
    fn inconsistent_phase_is_a_serialization_error() {
        let result = Event::try_from(event_row("closed"));
        assert!(matches!(result, Err(StoreError::Serialization(_))));
        let result = Event::try_from(event_row("archived"));
        assert!(matches!(result, Err(StoreError::Serialization(_))));
    }

    #[test]
    fn counts_reject_negative_values() {
        assert_eq!(count_from_db(7).unwrap(), 7);
        assert!(count_from_db(-1).is_err());
        assert!(count_to_db(u32::MAX).is_err());
    }
}
