//! Request lifecycle and settlement engine for a regulated
//! compliance-services marketplace.
//!
//! This crate brokers service requests between clients and independent
//! experts: a client submits a request, the pool matcher routes it to an
//! expert (directly or through the open pool), the state machine tracks it
//! through a fixed lifecycle, and the billing layer derives VAT-inclusive
//! invoices and spend aggregates from committed state.
//!
//! Concurrency model: the engine holds no locks of its own. Every mutation
//! is an atomic conditional write against the [`Ledger`] keyed on the
//! expected prior status, so racing writers (most importantly, experts
//! racing to accept the same pooled request) are arbitrated at the storage
//! boundary and exactly one wins.

pub mod billing;
pub mod config;
pub mod domain;
pub mod error;
pub mod ledger;
pub mod lifecycle;
pub mod money;
pub mod notify;
pub mod pool;

// Re-export commonly used types
pub use billing::{FinancialAggregator, InvoiceQuery, InvoiceView};
pub use config::EngineConfig;
pub use domain::{
    Actor, AdminData, ClientData, ExpertData, Invoice, InvoiceId, InvoiceStatus, InviteStatus,
    NewRequest, Offering, PoolInvite, Request, RequestId, RequestStatus, Role, RoleProfile, User,
    UserId,
};
pub use error::{Result, TadqiqError};
pub use ledger::{
    InviteResolution, InvoiceDraft, InvoiceFilter, Ledger, MemoryLedger, RequestFilter,
    TransitionEffects,
};
pub use lifecycle::{DisputeOutcome, Engine, Transition};
pub use money::{VatCalculator, DEFAULT_VAT_RATE};
pub use notify::{EmittedEvent, EventKind, NoopNotifier, Notifier, RecordingNotifier};
pub use pool::PoolMatcher;

#[cfg(feature = "postgres")]
pub use ledger::postgres::PostgresLedger;

/// Get the tadqiq database migrator.
///
/// Returns a migrator that can be run against a connection pool.
#[cfg(feature = "postgres")]
pub fn migrator() -> sqlx::migrate::Migrator {
    sqlx::migrate!("./migrations")
}
