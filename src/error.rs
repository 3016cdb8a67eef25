//! Fatal error taxonomy for allocation runs.
//!
//! Per-strategy and per-order failures degrade gracefully (logged and
//! surfaced in the execution record); the variants here are the ones that
//! make the whole plan meaningless and stop the run.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AllocationError {
    /// No baseline portfolio snapshot exists; nothing can be netted.
    #[error("portfolio snapshot missing - run a reconciliation first")]
    MissingPortfolio,

    /// Global kill switch is engaged.
    #[error("trading disabled by kill switch")]
    TradingDisabled,

    /// Overall exposure is configured to zero; no targets can be sized.
    #[error("overall exposure is zero")]
    ZeroExposure,
}
