use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("invalid reference pattern: {0}")]
    Pattern(#[from] regex::Error),
    #[error("ticket lookup failed: {0:#}")]
    Lookup(anyhow::Error),
    #[error("reconciliation ledger unavailable: {0:#}")]
    Ledger(anyhow::Error),
}
