//! Closeout Orchestrator.
//!
//! `finalize` sequences one closeout:
//!
//! 1. claim the event (`OPEN → FINALIZING`, compare-and-swap in the store)
//! 2. load contracts and check-ins, resolve rules, aggregate counts
//! 3. create the payout run (only while the claim holds) and write one line per
//!    contract; a line that fails to compute or persist is logged and reported,
//!    the rest still get written
//! 4. generate the statement when lines exist (best effort)
//! 5. close the event (`FINALIZING → CLOSED`, compare-and-swap)
//! 6. notify promoters and emit `event_closed` (best effort)
//!
//! Any failure before step 5 releases the claim, which deletes the run written
//! under it, so the call can be retried. A claim taken over after the TTL
//! deletes the stale attempt's run the same way. A retry after step 5 sees
//! `CLOSED` and is rejected as a conflict without writing anything.

use crate::checkins::{self, EffectiveCount};
use crate::collaborators::{
    Authorizer, DomainEvent, DomainEventEmitter, Notifier, PayoutNotice, StatementGenerator,
};
use crate::environment::Clock;
use crate::error::{CloseoutError, ConflictReason};
use crate::lifecycle::{ClaimToken, CloseoutPhase};
use crate::metrics;
use crate::payout::{self, PayoutBreakdown};
use crate::rules::{self, CommissionContract, ContractShape, ContractTerms};
use crate::settings::CloseoutSettings;
use crate::store::CloseoutStore;
use crate::types::{
    AmountOverflow, CloseoutRecord, ContractId, Event, EventId, Money, PaymentStatus, PayoutLine,
    PayoutLineId, PayoutRun, PayoutRunId, PromoterId, UserId,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;

/// The collaborators a closeout talks to.
#[derive(Clone)]
pub struct Collaborators {
    /// Access check
    pub authorizer: Arc<dyn Authorizer>,
    /// Statement rendering
    pub statements: Arc<dyn StatementGenerator>,
    /// Payout notices
    pub notifier: Arc<dyn Notifier>,
    /// Domain events
    pub emitter: Arc<dyn DomainEventEmitter>,
}

/// Optional closeout inputs.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalizeRequest {
    /// Revenue declared at closeout
    pub total_revenue: Option<Money>,
    /// Free-text notes
    pub closeout_notes: Option<String>,
}

/// A promoter whose line could not be written.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedLine {
    /// Promoter that was skipped
    pub promoter_id: PromoterId,
    /// Why
    pub error: String,
}

/// Result of a successful finalize.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FinalizeOutcome {
    /// The closed event
    pub event: Event,
    /// The run created by this closeout
    pub payout_run: PayoutRun,
    /// Lines written
    pub payout_lines: Vec<PayoutLine>,
    /// Lines that failed to compute or persist
    pub failed_lines: Vec<FailedLine>,
    /// Statement reference, when one was generated and attached
    pub statement_ref: Option<String>,
    /// Human-readable summary
    pub message: String,
}

/// One line of the closeout report.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReportLine {
    /// Promoter
    pub promoter_id: PromoterId,
    /// Count used in the payout math
    pub effective_count: u32,
    /// Aggregated count ("actual: N")
    pub actual_checkins: u32,
    /// Whether an override was used
    pub overridden: bool,
    /// Why the count was overridden
    pub override_reason: Option<String>,
    /// Commission owed
    pub commission_amount: Money,
    /// Payment state
    pub payment_status: PaymentStatus,
    /// Rule shape used
    pub shape: ContractShape,
    /// Stored breakdown
    pub breakdown: PayoutBreakdown,
}

/// Closeout state of an event, with the run that closed it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CloseoutReport {
    /// Event
    pub event_id: EventId,
    /// Display name
    pub event_name: String,
    /// Lifecycle phase
    pub phase: CloseoutPhase,
    /// Who closed it
    pub closed_by: Option<UserId>,
    /// When commission inputs were frozen
    pub locked_at: Option<DateTime<Utc>>,
    /// Notes entered at closeout
    pub closeout_notes: Option<String>,
    /// Revenue declared at closeout
    pub total_revenue: Option<Money>,
    /// Run that closed the event
    pub payout_run: Option<PayoutRun>,
    /// Its lines
    pub lines: Vec<ReportLine>,
    /// Sum of line commissions
    pub total_commission: Money,
}

/// Orchestrates closeout and contract writes for events.
#[derive(Clone)]
pub struct CloseoutService {
    store: Arc<dyn CloseoutStore>,
    collaborators: Collaborators,
    clock: Arc<dyn Clock>,
    settings: CloseoutSettings,
}

impl CloseoutService {
    /// Creates a new closeout service
    #[must_use]
    pub fn new(
        store: Arc<dyn CloseoutStore>,
        collaborators: Collaborators,
        clock: Arc<dyn Clock>,
        settings: CloseoutSettings,
    ) -> Self {
        Self {
            store,
            collaborators,
            clock,
            settings,
        }
    }

    /// Closes an event and produces its payout run.
    ///
    /// # Errors
    ///
    /// - `NotFound` when the event does not exist
    /// - `Authorization` when `caller` may not manage the event
    /// - `Conflict(AlreadyClosed)` when the event is closed (no run is created)
    /// - `Conflict(FinalizeInProgress)` while another call holds the event
    /// - `Persistence` when the run or the close transition cannot be written
    pub async fn finalize(
        &self,
        event_id: EventId,
        caller: UserId,
        request: FinalizeRequest,
    ) -> Result<FinalizeOutcome, CloseoutError> {
        let started = Instant::now();
        let result = self.finalize_inner(event_id, caller, request).await;
        match &result {
            Ok(outcome) => {
                metrics::record_finalized(started.elapsed().as_secs_f64());
                tracing::info!(
                    event_id = %event_id,
                    payout_run_id = %outcome.payout_run.id,
                    lines = outcome.payout_lines.len(),
                    failed_lines = outcome.failed_lines.len(),
                    "Event closed"
                );
            }
            Err(error) => {
                metrics::record_rejected(error.reason_label());
                tracing::warn!(event_id = %event_id, error = %error, "Finalize rejected");
            }
        }
        result
    }

    async fn finalize_inner(
        &self,
        event_id: EventId,
        caller: UserId,
        request: FinalizeRequest,
    ) -> Result<FinalizeOutcome, CloseoutError> {
        let before = self.store.get_event(event_id).await?;
        self.authorize(caller, event_id).await?;

        let claim = ClaimToken::new();
        let event = self
            .store
            .claim_closeout(event_id, claim, self.clock.now(), self.settings.claim_ttl)
            .await?;
        if let CloseoutPhase::Finalizing { claimed_at, .. } = before.closeout_phase {
            tracing::warn!(
                event_id = %event_id,
                stale_claimed_at = %claimed_at,
                "Took over a stale closeout claim"
            );
        }

        match self.run_closeout(&event, claim, caller, request).await {
            Ok(outcome) => Ok(outcome),
            Err(error) => {
                if let Err(release_error) = self.store.release_closeout(event_id, claim).await {
                    tracing::error!(
                        event_id = %event_id,
                        error = %release_error,
                        "Failed to release closeout claim"
                    );
                }
                Err(error)
            }
        }
    }

    async fn run_closeout(
        &self,
        event: &Event,
        claim: ClaimToken,
        caller: UserId,
        request: FinalizeRequest,
    ) -> Result<FinalizeOutcome, CloseoutError> {
        let contracts = self.store.list_contracts(event.id).await?;
        let counts = checkins::aggregate(&self.store.list_checkins(event.id).await?);
        let now = self.clock.now();

        let mut run = PayoutRun {
            id: PayoutRunId::new(),
            event_id: event.id,
            created_by: caller,
            created_at: now,
            statement_ref: None,
        };
        self.store.create_payout_run(run.clone(), claim).await?;

        let mut payout_lines = Vec::with_capacity(contracts.len());
        let mut failed_lines = Vec::new();
        for contract in &contracts {
            let actual = counts.get(&contract.promoter_id).copied();
            let written = match build_line(contract, &run, actual, now) {
                Ok(line) => self
                    .store
                    .insert_payout_line(line.clone())
                    .await
                    .map(|()| line)
                    .map_err(|error| error.to_string()),
                Err(overflow) => Err(overflow.to_string()),
            };
            match written {
                Ok(line) => {
                    metrics::record_payout_line("written");
                    payout_lines.push(line);
                }
                Err(error) => {
                    metrics::record_payout_line("failed");
                    tracing::error!(
                        event_id = %event.id,
                        promoter_id = %contract.promoter_id,
                        payout_run_id = %run.id,
                        error = %error,
                        "Payout line not written"
                    );
                    failed_lines.push(FailedLine {
                        promoter_id: contract.promoter_id,
                        error,
                    });
                }
            }
        }

        let record = CloseoutRecord {
            closed_at: now,
            closed_by: caller,
            closeout_notes: request.closeout_notes,
            total_revenue: request.total_revenue,
            payout_run_id: run.id,
        };
        if !payout_lines.is_empty() {
            let closing = event.clone().closed_with(&record);
            run.statement_ref = self.generate_statement(&run, &payout_lines, &closing).await;
        }

        let closed = self.store.close_event(event.id, claim, record).await?;

        self.dispatch_side_effects(&closed, &run, &payout_lines).await;

        let message = summary_message(contracts.len(), payout_lines.len(), failed_lines.len());
        Ok(FinalizeOutcome {
            event: closed,
            statement_ref: run.statement_ref.clone(),
            payout_run: run,
            payout_lines,
            failed_lines,
            message,
        })
    }

    async fn generate_statement(
        &self,
        run: &PayoutRun,
        lines: &[PayoutLine],
        event: &Event,
    ) -> Option<String> {
        let statement_ref = match self.collaborators.statements.generate(run, lines, event).await {
            Ok(statement_ref) => statement_ref,
            Err(error) => {
                metrics::record_side_effect_failure("statement");
                tracing::warn!(
                    event_id = %event.id,
                    payout_run_id = %run.id,
                    error = %error,
                    "Statement generation failed"
                );
                return None;
            }
        };

        match self
            .store
            .attach_statement(run.id, statement_ref.clone())
            .await
        {
            Ok(()) => Some(statement_ref),
            Err(error) => {
                metrics::record_side_effect_failure("statement");
                tracing::warn!(
                    payout_run_id = %run.id,
                    error = %error,
                    "Failed to attach statement to payout run"
                );
                None
            }
        }
    }

    async fn dispatch_side_effects(&self, event: &Event, run: &PayoutRun, lines: &[PayoutLine]) {
        for line in lines {
            let notice = PayoutNotice {
                promoter_id: line.promoter_id,
                amount: line.commission_amount,
                event_id: event.id,
                event_name: event.name.clone(),
                statement_ref: run.statement_ref.clone(),
            };
            if let Err(error) = self.collaborators.notifier.payout_ready(&notice).await {
                metrics::record_side_effect_failure("notification");
                tracing::warn!(
                    event_id = %event.id,
                    promoter_id = %line.promoter_id,
                    error = %error,
                    "Payout notification failed"
                );
            }
        }

        let closed = DomainEvent::EventClosed {
            event_id: event.id,
            payout_run_id: run.id,
            promoter_count: lines.len(),
        };
        if let Err(error) = self.collaborators.emitter.emit(closed).await {
            metrics::record_side_effect_failure("domain_event");
            tracing::warn!(event_id = %event.id, error = %error, "Domain event emission failed");
        }
    }

    /// Attaches a promoter to an event or replaces its contract terms.
    ///
    /// # Errors
    ///
    /// - `NotFound` when the event does not exist
    /// - `Authorization` when `caller` may not manage the event
    /// - `InvalidContract` when the terms fail validation
    /// - `Conflict(FinalizeInProgress)` while a finalize call holds the event
    /// - `Conflict(EventLocked)` once commission inputs are frozen
    pub async fn upsert_contract(
        &self,
        event_id: EventId,
        promoter_id: PromoterId,
        terms: ContractTerms,
        caller: UserId,
    ) -> Result<CommissionContract, CloseoutError> {
        let event = self.store.get_event(event_id).await?;
        self.authorize(caller, event_id).await?;
        if event.is_locked() {
            return Err(locked_event(event_id));
        }
        if event.is_finalizing() {
            return Err(CloseoutError::conflict(
                ConflictReason::FinalizeInProgress,
                format!("event {event_id} is being finalized"),
            ));
        }
        terms.validate()?;

        let now = self.clock.now();
        let existing = self
            .store
            .list_contracts(event_id)
            .await?
            .into_iter()
            .find(|contract| contract.promoter_id == promoter_id);
        let contract = match existing {
            Some(current) => CommissionContract {
                terms,
                updated_at: now,
                ..current
            },
            None => CommissionContract {
                id: ContractId::new(),
                event_id,
                promoter_id,
                terms,
                created_at: now,
                updated_at: now,
            },
        };

        let saved = self.store.upsert_contract(contract).await?;
        tracing::info!(
            event_id = %event_id,
            promoter_id = %promoter_id,
            shape = ?rules::resolve(&saved.terms).rules.shape(),
            "Commission contract saved"
        );
        Ok(saved)
    }

    /// The event's closeout state and, once closed, its payout run and lines.
    ///
    /// # Errors
    ///
    /// `NotFound` or `Authorization`.
    pub async fn closeout_report(
        &self,
        event_id: EventId,
        caller: UserId,
    ) -> Result<CloseoutReport, CloseoutError> {
        let event = self.store.get_event(event_id).await?;
        self.authorize(caller, event_id).await?;

        let (payout_run, lines) = match event.payout_run_id {
            Some(run_id) => {
                let run = self.store.get_payout_run(run_id).await?;
                let lines = self.store.list_payout_lines(run_id).await?;
                (Some(run), lines)
            }
            None => (None, Vec::new()),
        };

        let lines: Vec<ReportLine> = lines
            .into_iter()
            .map(|line| ReportLine {
                promoter_id: line.promoter_id,
                effective_count: line.checkins_count,
                actual_checkins: line.actual_checkins,
                overridden: line.checkins_override_reason.is_some()
                    || line.checkins_count != line.actual_checkins,
                override_reason: line.checkins_override_reason,
                commission_amount: line.commission_amount,
                payment_status: line.payment_status,
                shape: line.breakdown.shape,
                breakdown: line.breakdown,
            })
            .collect();
        let total_commission = lines.iter().map(|line| line.commission_amount).sum();

        Ok(CloseoutReport {
            event_id: event.id,
            event_name: event.name,
            phase: event.closeout_phase,
            closed_by: event.closed_by,
            locked_at: event.locked_at,
            closeout_notes: event.closeout_notes,
            total_revenue: event.total_revenue,
            payout_run,
            lines,
            total_commission,
        })
    }

    async fn authorize(&self, caller: UserId, event_id: EventId) -> Result<(), CloseoutError> {
        authorize(self.collaborators.authorizer.as_ref(), caller, event_id).await
    }
}

/// Fails closed: an authorizer error is treated as a denial.
pub(crate) async fn authorize(
    authorizer: &dyn Authorizer,
    caller: UserId,
    event_id: EventId,
) -> Result<(), CloseoutError> {
    match authorizer.can_manage_event(caller, event_id).await {
        Ok(true) => Ok(()),
        Ok(false) => Err(CloseoutError::Authorization(format!(
            "user {caller} may not manage event {event_id}"
        ))),
        Err(error) => {
            tracing::error!(
                event_id = %event_id,
                user_id = %caller,
                error = %error,
                "Authorization check failed"
            );
            Err(CloseoutError::Authorization(
                "authorization check could not be completed".to_string(),
            ))
        }
    }
}

pub(crate) fn locked_event(event_id: EventId) -> CloseoutError {
    CloseoutError::conflict(
        ConflictReason::EventLocked,
        format!("event {event_id} is locked for closeout"),
    )
}

fn build_line(
    contract: &CommissionContract,
    run: &PayoutRun,
    actual: Option<u32>,
    now: DateTime<Utc>,
) -> Result<PayoutLine, AmountOverflow> {
    let resolved = rules::resolve_contract(contract);
    let count = EffectiveCount::resolve(
        actual.unwrap_or(0),
        resolved.rules.checkins_override.as_ref(),
    );
    let breakdown = payout::calculate(&resolved.rules, count.effective)?;

    Ok(PayoutLine {
        id: PayoutLineId::new(),
        payout_run_id: run.id,
        event_id: run.event_id,
        promoter_id: contract.promoter_id,
        checkins_count: count.effective,
        actual_checkins: count.actual,
        checkins_override_reason: count.override_reason,
        commission_amount: breakdown.total,
        breakdown,
        payment_status: PaymentStatus::PendingPayment,
        created_at: now,
    })
}

fn summary_message(contracts: usize, written: usize, failed: usize) -> String {
    if contracts == 0 {
        return "Event closed. No promoters configured; an empty payout run was recorded for audit."
            .to_string();
    }
    let closed = format!("Event closed with payouts for {written} of {contracts} promoter(s).");
    if failed == 0 {
        closed
    } else {
        format!("{closed} {failed} payout line(s) failed to compute or save and need attention.")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_distinguishes_no_promoters() {
        assert!(summary_message(0, 0, 0).contains("No promoters configured"));
        assert_eq!(
            summary_message(3, 3, 0),
            "Event closed with payouts for 3 of 3 promoter(s)."
        );
        assert!(summary_message(3, 2, 1).contains("1 payout line(s) failed"));
    }
}
