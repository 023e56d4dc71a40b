//! Cost Ledger and per-assessment budget
//!
//! Ledger rows are appended by the audit recorder in the same transaction
//! that moves an audit call to its terminal status, so the ledger mirrors the
//! audit trail exactly once per call. This module owns the read side and the
//! in-flight spend ceiling.

use serde::Serialize;
use sqlx::SqlitePool;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::db::ledger::{self as ledger_db, LedgerEntry};
use crate::error::{EngineError, EngineResult};

/// Read access to the append-only ledger
#[derive(Clone)]
pub struct CostLedger {
    pool: SqlitePool,
}

/// Ledger totals for one assessment
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LedgerSummary {
    pub assessment_id: Uuid,
    pub cost_total: f64,
    pub tokens_total: u64,
    pub entries: Vec<LedgerEntry>,
}

impl CostLedger {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// (cost, tokens) recorded for an assessment
    pub async fn totals(&self, assessment_id: Uuid) -> EngineResult<(f64, u64)> {
        ledger_db::total_for_assessment(&self.pool, assessment_id)
            .await
            .map_err(|e| EngineError::AuditWriteFailure(format!("ledger unreadable: {}", e)))
    }

    pub async fn summary(&self, assessment_id: Uuid) -> EngineResult<LedgerSummary> {
        let entries = ledger_db::list_for_assessment(&self.pool, assessment_id).await?;
        let cost_total = entries.iter().map(|e| e.cost).sum();
        let tokens_total = entries.iter().map(|e| e.tokens).sum();
        Ok(LedgerSummary {
            assessment_id,
            cost_total,
            tokens_total,
            entries,
        })
    }
}

#[derive(Debug, Default)]
struct BudgetState {
    spent: f64,
    reserved: f64,
}

/// Spend held against the budget while a call is in flight
#[derive(Debug)]
#[must_use = "a reservation must be settled"]
pub struct Reservation {
    amount: f64,
}

/// Per-assessment Tier 3 spend ceiling
///
/// Each attempt reserves its estimated cost before dispatch; an attempt that
/// would push spent + reserved past the ceiling is refused. Settlement swaps
/// the reservation for the actual cost.
#[derive(Debug)]
pub struct CostBudget {
    ceiling: f64,
    state: Mutex<BudgetState>,
}

impl CostBudget {
    pub fn new(ceiling: f64) -> Self {
        Self {
            ceiling: ceiling.max(0.0),
            state: Mutex::new(BudgetState::default()),
        }
    }

    pub fn ceiling(&self) -> f64 {
        self.ceiling
    }

    pub async fn reserve(&self, estimate: f64) -> EngineResult<Reservation> {
        let mut state = self.state.lock().await;
        let committed = state.spent + state.reserved;
        if committed + estimate > self.ceiling + f64::EPSILON {
            return Err(EngineError::BudgetExceeded {
                ceiling: self.ceiling,
                spent: state.spent,
            });
        }
        state.reserved += estimate;
        Ok(Reservation { amount: estimate })
    }

    pub async fn settle(&self, reservation: Reservation, actual: f64) {
        let mut state = self.state.lock().await;
        state.reserved = (state.reserved - reservation.amount).max(0.0);
        state.spent += actual;
    }

    pub async fn spent(&self) -> f64 {
        self.state.lock().await.spent
    }
}
