//! Production collaborators.
//!
//! Authorization reads `event_managers`. Statements, notices and domain events
//! are handed off as structured log records; rendering PDFs and delivering
//! messages belong to the services behind those logs.

use closeout_core::collaborators::{
    Authorizer, CollaboratorFuture, DomainEvent, DomainEventEmitter, Notifier, PayoutNotice,
    StatementGenerator,
};
use closeout_core::error::CollaboratorError;
use closeout_core::types::{Event, EventId, Money, PayoutLine, PayoutRun, UserId};
use serde::Serialize;
use sqlx::PgPool;

/// Grants access to users listed in `event_managers` for the event.
#[derive(Clone, Debug)]
pub struct PostgresAuthorizer {
    pool: PgPool,
}

impl PostgresAuthorizer {
    /// Creates a new authorizer over the pool
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl Authorizer for PostgresAuthorizer {
    fn can_manage_event(&self, caller: UserId, event_id: EventId) -> CollaboratorFuture<'_, bool> {
        Box::pin(async move {
            let (allowed,): (bool,) = sqlx::query_as(
                "SELECT EXISTS(SELECT 1 FROM event_managers WHERE event_id = $1 AND user_id = $2)",
            )
            .bind(event_id.as_uuid())
            .bind(caller.as_uuid())
            .fetch_one(&self.pool)
            .await
            .map_err(|e| CollaboratorError::new("authorizer", e.to_string()))?;
            Ok(allowed)
        })
    }
}

#[derive(Serialize)]
struct StatementPayload<'a> {
    payout_run_id: String,
    event_id: String,
    event_name: &'a str,
    closed_at: Option<String>,
    line_count: usize,
    total_commission: Money,
    lines: Vec<StatementLine>,
}

impl<'a> StatementPayload<'a> {
    /// `event` is the event as it reads once closed, so `closed_at` is set.
    fn new(run: &PayoutRun, lines: &[PayoutLine], event: &'a Event) -> Self {
        Self {
            payout_run_id: run.id.to_string(),
            event_id: event.id.to_string(),
            event_name: &event.name,
            closed_at: event.closed_at().map(|at| at.to_rfc3339()),
            line_count: lines.len(),
            total_commission: lines.iter().map(|line| line.commission_amount).sum(),
            lines: lines
                .iter()
                .map(|line| StatementLine {
                    promoter_id: line.promoter_id.to_string(),
                    effective_checkins: line.checkins_count,
                    actual_checkins: line.actual_checkins,
                    commission_amount: line.commission_amount,
                })
                .collect(),
        }
    }
}

#[derive(Serialize)]
struct StatementLine {
    promoter_id: String,
    effective_checkins: u32,
    actual_checkins: u32,
    commission_amount: Money,
}

/// Publishes a statement payload and returns `{base_url}/{payout_run_id}`.
#[derive(Clone, Debug)]
pub struct LinkStatementGenerator {
    base_url: String,
}

impl LinkStatementGenerator {
    /// Creates a generator rooted at `base_url`
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
        }
    }

    fn reference(&self, run: &PayoutRun) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), run.id)
    }
}

impl StatementGenerator for LinkStatementGenerator {
    fn generate<'a>(
        &'a self,
        run: &'a PayoutRun,
        lines: &'a [PayoutLine],
        event: &'a Event,
    ) -> CollaboratorFuture<'a, String> {
        Box::pin(async move {
            let body = serde_json::to_string(&StatementPayload::new(run, lines, event))
                .map_err(|e| CollaboratorError::new("statement", e.to_string()))?;
            let reference = self.reference(run);

            tracing::info!(
                target: "closeout::statements",
                payout_run_id = %run.id,
                event_id = %event.id,
                statement_ref = %reference,
                statement = %body,
                "Statement published"
            );
            Ok(reference)
        })
    }
}

/// Logs payout notices for the notification pipeline.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn payout_ready<'a>(&'a self, notice: &'a PayoutNotice) -> CollaboratorFuture<'a, ()> {
        Box::pin(async move {
            tracing::info!(
                target: "closeout::notifications",
                promoter_id = %notice.promoter_id,
                event_id = %notice.event_id,
                event_name = %notice.event_name,
                amount = %notice.amount,
                statement_ref = ?notice.statement_ref,
                "Payout ready"
            );
            Ok(())
        })
    }
}

/// Logs domain events for the event pipeline.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingEventEmitter;

impl DomainEventEmitter for TracingEventEmitter {
    fn emit(&self, event: DomainEvent) -> CollaboratorFuture<'_, ()> {
        Box::pin(async move {
            let payload = serde_json::to_string(&event)
                .map_err(|e| CollaboratorError::new("emitter", e.to_string()))?;
            tracing::info!(
                target: "closeout::events",
                event_type = event.name(),
                payload = %payload,
                "Domain event emitted"
            );
            Ok(())
        })
    }
}
