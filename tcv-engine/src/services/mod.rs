//! Engine services
//!
//! The escalation controller owns the assessment state machine; every other
//! service is a collaborator it drives:
//! - rule store (versioned snapshots), claim extraction
//! - audit recorder and cost ledger (provenance and spend)
//! - response cache, hallucination detector, scoring aggregator
//! - verification gate (human review queue)

pub mod audit_recorder;
pub mod claim_extractor;
pub mod cost_ledger;
pub mod escalation_controller;
pub mod hallucination_detector;
pub mod response_cache;
pub mod rule_store;
pub mod scoring;
pub mod verification_gate;

pub use audit_recorder::AuditRecorder;
pub use cost_ledger::{CostBudget, CostLedger};
pub use escalation_controller::{CancellationMap, EscalationController};
pub use response_cache::ResponseCache;
pub use rule_store::{RuleStore, Ruleset, SqliteRuleStore};
pub use verification_gate::VerificationGate;
