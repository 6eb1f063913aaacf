//! # Closeout Core
//!
//! Commission calculation and event closeout engine.
//!
//! At the end of an event this crate works out what each promoter (and, for
//! table reservations, the venue) is owed, then locks that result so it can
//! never silently change again.
//!
//! ## Components
//!
//! - **Rule Resolver** ([`rules`]): flat contract record → tagged [`rules::CommissionRules`]
//! - **Check-in Aggregator** ([`checkins`]): valid check-ins per promoter, effective count
//! - **Payout Calculator** ([`payout`]): pure `(rules, count) → breakdown`
//! - **Table-Spend Calculator** ([`table_spend`]): pure per-booking venue/promoter split
//! - **Closeout Orchestrator** ([`closeout`]): `OPEN → FINALIZING → CLOSED` ([`lifecycle`])
//! - **Table commissions** ([`table_commissions`]): upserts per-booking records
//!
//! ## Architecture
//!
//! - Functional core: the calculators are synchronous and side-effect free
//! - Storage behind [`store::CloseoutStore`] / [`store::TableBookingStore`]
//! - Collaborators behind traits in [`collaborators`]
//! - Time injected through [`environment::Clock`]
//!
//! ## Example
//!
//! ```ignore
//! use closeout_core::prelude::*;
//!
//! let service = CloseoutService::new(store, collaborators, Arc::new(SystemClock), CloseoutSettings::default());
//! let outcome = service
//!     .finalize(event_id, caller, FinalizeRequest::default())
//!     .await?;
//! println!("{}", outcome.message);
//! ```

pub mod checkins;
pub mod closeout;
pub mod collaborators;
pub mod environment;
pub mod error;
pub mod lifecycle;
pub mod metrics;
pub mod payout;
pub mod rules;
pub mod settings;
pub mod store;
pub mod table_commissions;
pub mod table_spend;
pub mod types;

/// Commonly used types.
pub mod prelude {
    pub use crate::closeout::{
        CloseoutReport, CloseoutService, Collaborators, FinalizeOutcome, FinalizeRequest,
    };
    pub use crate::collaborators::{
        Authorizer, DomainEvent, DomainEventEmitter, Notifier, PayoutNotice, StatementGenerator,
    };
    pub use crate::environment::{Clock, SystemClock};
    pub use crate::error::{CloseoutError, CollaboratorError, ConflictReason, StoreError};
    pub use crate::lifecycle::{ClaimToken, CloseoutPhase};
    pub use crate::rules::{CommissionContract, CommissionRules, ContractTerms};
    pub use crate::settings::CloseoutSettings;
    pub use crate::store::{CloseoutStore, TableBookingStore};
    pub use crate::table_commissions::{TableCommissionReport, TableCommissionService};
    pub use crate::types::*;
}
