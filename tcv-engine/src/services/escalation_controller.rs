//! Escalation Controller
//!
//! Drives one assessment through the tiers:
//!
//! ```text
//! INIT → TIER1 → {REJECTED | TIER2} → {REJECTED | MANUAL_REVIEW | TIER3} → AGGREGATE
//! ```
//!
//! Tier 1 and Tier 2 run inline. Tier 3 runs on its own task so a
//! cancellation can return immediately; calls already in flight finish and
//! stay audited, their verdicts are discarded.
//!
//! The assessment id is generated once at ingress and threaded through
//! every layer (audit calls, ledger, claims, detections, review item).
//! Rule store and audit store failures abort; provider and budget failures
//! degrade the result instead.

use sqlx::SqlitePool;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::EngineSettings;
use crate::db::assessments as assessments_db;
use crate::db::claims as claims_db;
use crate::db::hallucinations as hallucinations_db;
use crate::db::review as review_db;
use crate::error::{EngineError, EngineResult};
use crate::services::audit_recorder::AuditRecorder;
use crate::services::claim_extractor::extract_claims;
use crate::services::cost_ledger::{CostBudget, CostLedger};
use crate::services::hallucination_detector::{self, DetectionReport};
use crate::services::response_cache::{cache_key, ResponseCache};
use crate::services::rule_store::{RuleStore, Ruleset};
use crate::services::scoring::{self, ScoreInputs, ScoringPolicy};
use crate::services::verification_gate::review_item_for;
use crate::tiers::tier3::{Tier3Evaluator, Tier3Job, Tier3Outcome};
use crate::tiers::{tier1, tier2};
use crate::types::{
    AssessmentRequest, AssessmentResult, AssessmentStatus, Claim, ReviewItem, Tier, TierResult,
};
use crate::utils::retry_on_lock;

/// In-flight assessments and their cancellation tokens
pub type CancellationMap = Arc<RwLock<HashMap<Uuid, CancellationToken>>>;

/// Everything decided before the result is scored and persisted
struct Draft {
    assessment_id: Uuid,
    /// Hash of the content that was actually validated
    content_hash: String,
    ruleset: Arc<Ruleset>,
    tier_results: Vec<TierResult>,
    tier3: Option<Arc<Tier3Outcome>>,
    tier3_cached: bool,
    tier3_skipped: bool,
    detections: DetectionReport,
    fixed_content: Option<String>,
    started: Instant,
}

impl Draft {
    fn new(assessment_id: Uuid, content: &str, ruleset: Arc<Ruleset>, started: Instant) -> Self {
        Self {
            assessment_id,
            content_hash: tcv_common::hashing::sha256_hex(content.as_bytes()),
            ruleset,
            tier_results: Vec::new(),
            tier3: None,
            tier3_cached: false,
            tier3_skipped: false,
            detections: DetectionReport::default(),
            fixed_content: None,
            started,
        }
    }

    fn tiers_run(&self) -> Vec<String> {
        self.tier_results.iter().map(|r| r.tier.label()).collect()
    }
}

pub struct EscalationController {
    pool: SqlitePool,
    rule_store: Arc<dyn RuleStore>,
    tier3: Tier3Evaluator,
    recorder: AuditRecorder,
    ledger: CostLedger,
    cache: Arc<ResponseCache>,
    settings: EngineSettings,
    in_flight: CancellationMap,
}

impl EscalationController {
    pub fn new(
        pool: SqlitePool,
        rule_store: Arc<dyn RuleStore>,
        tier3: Tier3Evaluator,
        recorder: AuditRecorder,
        cache: Arc<ResponseCache>,
        settings: EngineSettings,
        in_flight: CancellationMap,
    ) -> Self {
        Self {
            ledger: CostLedger::new(pool.clone()),
            pool,
            rule_store,
            tier3,
            recorder,
            cache,
            settings,
            in_flight,
        }
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn rule_store(&self) -> &Arc<dyn RuleStore> {
        &self.rule_store
    }

    pub async fn assess(&self, request: AssessmentRequest) -> EngineResult<AssessmentResult> {
        self.assess_with_id(tcv_common::uuid_utils::generate(), request).await
    }

    /// Run an assessment under a caller-chosen id
    ///
    /// The id is registered for cancellation for as long as the assessment runs.
    pub async fn assess_with_id(
        &self,
        assessment_id: Uuid,
        request: AssessmentRequest,
    ) -> EngineResult<AssessmentResult> {
        let token = CancellationToken::new();
        self.in_flight.write().await.insert(assessment_id, token.clone());

        let outcome = self.run(assessment_id, &request, &token).await;

        self.in_flight.write().await.remove(&assessment_id);

        match &outcome {
            Ok(result) => info!(
                assessment_id = %assessment_id,
                status = result.status.as_str(),
                score = result.overall_score,
                cost = result.cost_total,
                tiers = ?result.tiers_run,
                elapsed_ms = result.processing_time_ms,
                "Assessment complete"
            ),
            Err(EngineError::Cancelled(_)) => {
                warn!(assessment_id = %assessment_id, "Assessment cancelled")
            }
            Err(e) if e.is_fatal() => {
                error!(assessment_id = %assessment_id, error = %e, "Assessment aborted")
            }
            Err(e) => debug!(assessment_id = %assessment_id, error = %e, "Assessment refused"),
        }
        outcome
    }

    /// Cancel an in-flight assessment; false if it is not running
    pub async fn cancel(&self, assessment_id: Uuid) -> bool {
        match self.in_flight.read().await.get(&assessment_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub async fn active(&self) -> Vec<Uuid> {
        let mut ids: Vec<Uuid> = self.in_flight.read().await.keys().copied().collect();
        ids.sort();
        ids
    }

    fn validate(&self, request: &AssessmentRequest) -> EngineResult<()> {
        if request.content.trim().is_empty() {
            return Err(EngineError::Validation("content must not be empty".to_string()));
        }
        if request.content.len() > self.settings.max_content_bytes {
            return Err(EngineError::Validation(format!(
                "content is {} bytes, limit is {}",
                request.content.len(),
                self.settings.max_content_bytes
            )));
        }
        if request.page_type.trim().is_empty() {
            return Err(EngineError::Validation("page_type must not be empty".to_string()));
        }
        if let Some(ceiling) = request.options.cost_ceiling {
            if !(ceiling >= 0.0) {
                return Err(EngineError::Validation(
                    "options.cost_ceiling must be >= 0".to_string(),
                ));
            }
        }
        Ok(())
    }

    /// Configured ceiling, lowered (never raised) by the request
    fn cost_ceiling(&self, request: &AssessmentRequest) -> f64 {
        let configured = self.settings.cost_ceiling_per_assessment;
        request
            .options
            .cost_ceiling
            .map(|c| c.min(configured))
            .unwrap_or(configured)
    }

    async fn run(
        &self,
        assessment_id: Uuid,
        request: &AssessmentRequest,
        token: &CancellationToken,
    ) -> EngineResult<AssessmentResult> {
        let started = Instant::now();
        self.validate(request)?;
        let ruleset = self.rule_store.current().await?;

        debug!(
            assessment_id = %assessment_id,
            page_type = %request.page_type,
            ruleset = %ruleset.version,
            bytes = request.content.len(),
            "Assessment started"
        );

        // TIER1
        let tier1_rules = ruleset.for_tier(Tier::One, &request.page_type);
        let mut tier1_result = tier1::evaluate(&tier1_rules, &request.content);
        let mut content = request.content.clone();
        let mut fixed_content = None;

        if !tier1_result.has_blocking() && !request.options.disable_auto_fix {
            if let Some(fix) = tier1::auto_fix(&tier1_rules, &content, &tier1_result.violations) {
                debug!(assessment_id = %assessment_id, rules = ?fix.rule_ids, "Auto-fix applied");
                // Re-validated once; the fixed text is never fixed again
                tier1_result = tier1::evaluate(&tier1_rules, &fix.content);
                content = fix.content;
                fixed_content = Some(content.clone());
            }
        }

        let mut draft = Draft::new(assessment_id, &content, Arc::clone(&ruleset), started);
        draft.fixed_content = fixed_content;

        let tier1_blocked = tier1_result.has_blocking();
        draft.tier_results.push(tier1_result);
        if tier1_blocked {
            info!(assessment_id = %assessment_id, "Tier 1 blocked, short-circuit");
            return self.finish(draft, request).await;
        }

        // TIER2
        let tier2_rules = ruleset.for_tier(Tier::Two, &request.page_type);
        let tier2_outcome = tier2::evaluate(&tier2_rules, &content);
        let tier2_blocked = tier2_outcome.result.has_blocking();
        let hard_fail = tier2_outcome.is_hard_fail(self.settings.tier2_hard_fail_threshold);
        draft.tier_results.push(tier2_outcome.result);

        if tier2_blocked {
            info!(assessment_id = %assessment_id, "Tier 2 blocked");
            return self.finish(draft, request).await;
        }
        let budget_saving = request
            .options
            .budget_saving
            .unwrap_or(self.settings.budget_saving);
        if hard_fail && budget_saving {
            info!(
                assessment_id = %assessment_id,
                aggregate = tier2_outcome.aggregate,
                "Tier 2 hard fail, Tier 3 skipped"
            );
            draft.tier3_skipped = true;
            return self.finish(draft, request).await;
        }

        // TIER3
        let tier3_rules: Vec<_> = ruleset
            .for_tier(Tier::Three, &request.page_type)
            .into_iter()
            .map(|c| c.rule.clone())
            .collect();
        let claims = extract_claims(&content);

        if tier3_rules.is_empty() && claims.is_empty() {
            debug!(assessment_id = %assessment_id, "Nothing for Tier 3 to check");
            return self.finish(draft, request).await;
        }
        if token.is_cancelled() {
            return Err(EngineError::Cancelled(assessment_id));
        }

        let key = cache_key(&content, &ruleset.version, &request.page_type, &request.industry);
        let (outcome, cached) = match self.cache.get(&key).await {
            Some(outcome) => (outcome, true),
            None => {
                let job = Tier3Job {
                    assessment_id,
                    content: content.clone(),
                    content_hash: draft.content_hash.clone(),
                    page_type: request.page_type.clone(),
                    industry: request.industry.clone(),
                    rules: tier3_rules,
                    claims,
                };
                let outcome = Arc::new(self.run_tier3(job, self.cost_ceiling(request), token).await?);
                self.cache.put(key, Arc::clone(&outcome)).await;
                (outcome, false)
            }
        };

        draft.tier_results.push(outcome.to_tier_result(cached));
        draft.detections = hallucination_detector::detect(
            assessment_id,
            outcome.claim_candidates(),
            ruleset.active_forbidden_phrases(),
        );
        draft.tier3 = Some(outcome);
        draft.tier3_cached = cached;

        self.finish(draft, request).await
    }

    async fn run_tier3(
        &self,
        job: Tier3Job,
        ceiling: f64,
        token: &CancellationToken,
    ) -> EngineResult<Tier3Outcome> {
        let assessment_id = job.assessment_id;
        let evaluator = self.tier3.clone();
        let task_token = token.clone();
        let handle = tokio::spawn(async move {
            let budget = CostBudget::new(ceiling);
            evaluator.evaluate(&job, &budget, &task_token).await
        });

        tokio::select! {
            _ = token.cancelled() => Err(EngineError::Cancelled(assessment_id)),
            joined = handle => joined.map_err(|e| {
                EngineError::Common(tcv_common::Error::Internal(format!(
                    "Tier 3 task for {} failed: {}",
                    assessment_id, e
                )))
            })?,
        }
    }

    /// AGGREGATE: score, enforce provenance, persist
    async fn finish(&self, draft: Draft, request: &AssessmentRequest) -> EngineResult<AssessmentResult> {
        let policy = ScoringPolicy {
            passing_threshold: draft.ruleset.passing_threshold,
            rejection_threshold: draft.ruleset.rejection_threshold,
            tier3_weight: self.settings.tier3_weight,
        };
        let verdict = scoring::aggregate(
            &ScoreInputs {
                tier_results: &draft.tier_results,
                tier3: draft.tier3.as_deref(),
                detections: &draft.detections.detections,
                surfaced: &draft.detections.surfaced,
                auto_fixed: draft.fixed_content.is_some(),
                tier3_skipped: draft.tier3_skipped,
            },
            &policy,
        );

        let claims: Vec<Claim> = draft
            .detections
            .surfaced
            .iter()
            .filter_map(|candidate| {
                candidate.source_audit_id.map(|source_audit_id| Claim {
                    claim_id: tcv_common::uuid_utils::generate(),
                    assessment_id: draft.assessment_id,
                    text: candidate.text.clone(),
                    source_audit_id,
                    content_hash: draft.content_hash.clone(),
                    confidence_level: candidate.confidence_level,
                    verified: false,
                })
            })
            .collect();
        self.recorder.verify_provenance(&claims).await?;

        let (cost_total, tokens_total) = self.ledger.totals(draft.assessment_id).await?;

        let mut result = AssessmentResult {
            assessment_id: draft.assessment_id,
            content_hash: draft.content_hash.clone(),
            ruleset_version: draft.ruleset.version.clone(),
            overall_score: verdict.overall_score,
            status: verdict.status,
            confidence_level: verdict.confidence_level,
            tiers_run: draft.tiers_run(),
            violations: draft
                .tier_results
                .iter()
                .flat_map(|r| r.violations.iter().cloned())
                .collect(),
            tier_results: draft.tier_results,
            claims,
            hallucinations: draft.detections.detections,
            fixed_content: draft.fixed_content,
            cost_total,
            tokens_total,
            processing_time_ms: 0,
            tier3_cached: draft.tier3_cached,
            review_item_id: None,
            created_at: tcv_common::time::now(),
        };

        let review_item = if result.status == AssessmentStatus::ManualReview {
            let item_id = tcv_common::uuid_utils::generate();
            result.review_item_id = Some(item_id);
            result.processing_time_ms = draft.started.elapsed().as_millis() as u64;
            let priority = request.options.review_priority.unwrap_or(0);
            Some(review_item_for(&result, item_id, priority)?)
        } else {
            result.processing_time_ms = draft.started.elapsed().as_millis() as u64;
            None
        };

        self.persist(&result, request, review_item.as_ref()).await?;
        Ok(result)
    }

    /// Write the result, its claims, detections and review item atomically
    async fn persist(
        &self,
        result: &AssessmentResult,
        request: &AssessmentRequest,
        review_item: Option<&ReviewItem>,
    ) -> EngineResult<()> {
        let pool = &self.pool;
        retry_on_lock("persist_assessment", self.settings.db_max_lock_wait_ms, || async move {
            let mut tx = pool.begin().await?;
            assessments_db::insert_assessment(&mut *tx, result, &request.page_type, &request.industry)
                .await?;
            for claim in &result.claims {
                claims_db::insert_claim(&mut *tx, claim).await?;
            }
            for detection in &result.hallucinations {
                hallucinations_db::insert_detection(&mut *tx, detection).await?;
            }
            if let Some(item) = review_item {
                review_db::insert_item(&mut *tx, item).await?;
            }
            tx.commit().await?;
            Ok(())
        })
        .await
        .map_err(|e| {
            EngineError::AuditWriteFailure(format!(
                "assessment {} could not be persisted: {}",
                result.assessment_id, e
            ))
        })
    }
}
