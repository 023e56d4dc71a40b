//! Audit Recorder
//!
//! Every external call gets an `audit_calls` row *before* it is dispatched
//! and exactly one terminal update afterwards. Only digests are stored:
//! SHA-256, byte size and a `sha256:` reference for the request and
//! response bodies.
//!
//! The terminal update and the matching cost ledger entry are written in one
//! transaction. Any failure to write is `AuditWriteFailure`, which aborts the
//! assessment.

use sqlx::SqlitePool;
use std::time::Instant;
use tracing::{debug, error};
use uuid::Uuid;

use crate::db::audit_calls::{self as audit_db, AuditCompletion};
use crate::db::ledger::{self as ledger_db, LedgerEntry};
use crate::error::{EngineError, EngineResult};
use crate::providers::{BodyDigest, ProviderReply};
use crate::types::{AuditCall, AuditStatus, Claim};
use crate::utils::retry_on_lock;

/// Handle to an audit row that is still PENDING
#[derive(Debug, Clone)]
pub struct PendingCall {
    pub audit_id: Uuid,
    pub assessment_id: Uuid,
    pub tool: String,
    pub endpoint: String,
    started: Instant,
}

#[derive(Clone)]
pub struct AuditRecorder {
    pool: SqlitePool,
    max_lock_wait_ms: u64,
}

impl AuditRecorder {
    pub fn new(pool: SqlitePool, max_lock_wait_ms: u64) -> Self {
        Self {
            pool,
            max_lock_wait_ms,
        }
    }

    /// Write the PENDING row for a call about to be dispatched
    pub async fn begin(
        &self,
        assessment_id: Uuid,
        tool: &str,
        endpoint: &str,
        content_hash: &str,
        request_body: &str,
    ) -> EngineResult<PendingCall> {
        let digest = BodyDigest::of(request_body);
        let call = AuditCall {
            audit_id: tcv_common::uuid_utils::generate(),
            assessment_id,
            tool: tool.to_string(),
            endpoint: endpoint.to_string(),
            content_hash: content_hash.to_string(),
            request_hash: digest.hash.clone(),
            request_size: digest.size,
            request_ref: digest.storage_ref(),
            response_hash: None,
            response_size: None,
            response_status: None,
            status: AuditStatus::Pending,
            cost: 0.0,
            tokens: 0,
            started_at: tcv_common::time::now(),
            completed_at: None,
            duration_ms: None,
        };

        retry_on_lock("audit_begin", self.max_lock_wait_ms, || {
            audit_db::insert_pending(&self.pool, &call)
        })
        .await
        .map_err(|e| {
            error!(assessment_id = %assessment_id, tool, error = %e, "Audit row could not be written");
            EngineError::AuditWriteFailure(format!("begin {}: {}", tool, e))
        })?;

        debug!(assessment_id = %assessment_id, audit_id = %call.audit_id, tool, "Audit call pending");

        Ok(PendingCall {
            audit_id: call.audit_id,
            assessment_id,
            tool: call.tool,
            endpoint: call.endpoint,
            started: Instant::now(),
        })
    }

    /// Record a call that returned a response
    pub async fn complete_success(
        &self,
        pending: &PendingCall,
        reply: &ProviderReply,
        cost: f64,
        tokens: u64,
    ) -> EngineResult<()> {
        let completion = AuditCompletion {
            audit_id: pending.audit_id,
            status: AuditStatus::Success,
            response_hash: Some(reply.body.hash.clone()),
            response_size: Some(reply.body.size),
            response_status: Some(reply.http_status),
            cost,
            tokens,
            error: None,
            completed_at: tcv_common::time::now(),
            duration_ms: pending.started.elapsed().as_millis() as u64,
        };
        self.complete(pending, completion).await
    }

    /// Record a call that timed out or failed
    pub async fn complete_failure(
        &self,
        pending: &PendingCall,
        status: AuditStatus,
        http_status: Option<u16>,
        error: &str,
        cost: f64,
    ) -> EngineResult<()> {
        let completion = AuditCompletion {
            audit_id: pending.audit_id,
            status,
            response_hash: None,
            response_size: None,
            response_status: http_status,
            cost,
            tokens: 0,
            error: Some(error.to_string()),
            completed_at: tcv_common::time::now(),
            duration_ms: pending.started.elapsed().as_millis() as u64,
        };
        self.complete(pending, completion).await
    }

    async fn complete(&self, pending: &PendingCall, completion: AuditCompletion) -> EngineResult<()> {
        let entry = LedgerEntry {
            audit_id: pending.audit_id,
            assessment_id: pending.assessment_id,
            provider: pending.tool.clone(),
            endpoint: pending.endpoint.clone(),
            status: completion.status,
            cost: completion.cost,
            tokens: completion.tokens,
            recorded_at: completion.completed_at,
        };

        let pool = &self.pool;
        let (completion, entry) = (&completion, &entry);
        let changed = retry_on_lock("audit_complete", self.max_lock_wait_ms, || async move {
            let mut tx = pool.begin().await?;
            let changed = audit_db::complete_call(&mut *tx, completion).await?;
            if changed == 1 {
                ledger_db::append_entry(&mut *tx, entry).await?;
            }
            tx.commit().await?;
            Ok(changed)
        })
        .await
        .map_err(|e| {
            error!(audit_id = %pending.audit_id, error = %e, "Audit completion could not be written");
            EngineError::AuditWriteFailure(format!("complete {}: {}", pending.audit_id, e))
        })?;

        if changed == 0 {
            debug!(audit_id = %pending.audit_id, "Audit call already terminal, completion ignored");
        } else {
            debug!(
                audit_id = %pending.audit_id,
                status = completion.status.as_str(),
                cost = completion.cost,
                "Audit call completed"
            );
        }
        Ok(())
    }

    pub async fn calls_for(&self, assessment_id: Uuid) -> EngineResult<Vec<AuditCall>> {
        Ok(audit_db::list_for_assessment(&self.pool, assessment_id).await?)
    }

    /// Check that every claim traces to a successful audit call about the same content
    pub async fn verify_provenance(&self, claims: &[Claim]) -> EngineResult<()> {
        for claim in claims {
            let call = audit_db::get_call(&self.pool, claim.source_audit_id)
                .await
                .map_err(|e| EngineError::AuditWriteFailure(format!("audit store unreadable: {}", e)))?
                .ok_or_else(|| {
                    EngineError::ProvenanceViolation(format!(
                        "claim \"{}\" cites missing audit call {}",
                        claim.text, claim.source_audit_id
                    ))
                })?;

            if call.status != AuditStatus::Success {
                return Err(EngineError::ProvenanceViolation(format!(
                    "claim \"{}\" cites audit call {} with status {}",
                    claim.text,
                    call.audit_id,
                    call.status.as_str()
                )));
            }
            if call.content_hash != claim.content_hash {
                return Err(EngineError::ProvenanceViolation(format!(
                    "claim \"{}\" content hash does not match audit call {}",
                    claim.text, call.audit_id
                )));
            }
        }
        Ok(())
    }
}
