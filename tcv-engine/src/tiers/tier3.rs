//! Tier 3: paid LLM-backed checks
//!
//! Rule checks and claim checks are packed into the fewest outbound calls
//! the per-call limits allow. Each batch walks the provider waterfall:
//! timeouts, transport errors, 5xx, 429 and malformed bodies move on to the
//! next provider, up to `max_attempts` attempts. Every attempt is audited
//! before dispatch and settled against the assessment's cost budget.
//!
//! Up to `max_concurrency` batches are in flight at once; the join waits for
//! every batch to reach a terminal state. Checks that never got a verdict
//! come back as [`Finding::Unverified`] instead of failing the assessment.
//! Only audit write failures propagate.
//!
//! Once the assessment is cancelled no further attempts are dispatched;
//! calls already in flight run to their terminal audit state.

use futures::future::join_all;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::EngineSettings;
use crate::error::EngineResult;
use crate::providers::{
    ClaimCheck, ClaimVerdict, ProviderRequest, ProviderResponse, ProviderSlot, RuleCheck,
    RuleVerdict,
};
use crate::services::audit_recorder::AuditRecorder;
use crate::services::cost_ledger::CostBudget;
use crate::types::{
    AuditStatus, ClaimCandidate, ConfidenceLevel, Rule, Tier, TierResult, Violation,
};

/// Sub-score keys reported in the Tier 3 [`TierResult`]
pub const RULE_SCORE_KEY: &str = "tier3_rule_score";
pub const CLAIM_SUPPORT_KEY: &str = "claim_support_ratio";

#[derive(Debug, Clone)]
pub struct Tier3Settings {
    pub max_concurrency: usize,
    pub call_deadline: Duration,
    pub max_attempts: usize,
    pub max_rules_per_call: usize,
    pub max_claims_per_call: usize,
}

impl From<&EngineSettings> for Tier3Settings {
    fn from(settings: &EngineSettings) -> Self {
        Self {
            max_concurrency: settings.tier3_max_concurrency.max(1),
            call_deadline: settings.call_deadline(),
            max_attempts: settings.tier3_max_attempts.max(1),
            max_rules_per_call: settings.max_rules_per_call.max(1),
            max_claims_per_call: settings.max_claims_per_call.max(1),
        }
    }
}

/// Everything Tier 3 needs about one assessment
#[derive(Debug, Clone)]
pub struct Tier3Job {
    pub assessment_id: Uuid,
    pub content: String,
    /// Hash of `content`, recorded on every audit call
    pub content_hash: String,
    pub page_type: String,
    pub industry: String,
    pub rules: Vec<Rule>,
    pub claims: Vec<String>,
}

/// Verdict for one check, or the reason there is none
#[derive(Debug, Clone, PartialEq)]
pub enum Finding<T> {
    Verified { verdict: T, audit_id: Uuid },
    Unverified { reason: String },
}

impl<T> Finding<T> {
    pub fn is_verified(&self) -> bool {
        matches!(self, Finding::Verified { .. })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RuleFinding {
    pub rule: Rule,
    pub outcome: Finding<RuleVerdict>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClaimFinding {
    pub text: String,
    pub outcome: Finding<ClaimVerdict>,
}

/// Joined result of every Tier 3 batch
#[derive(Debug, Clone, PartialEq)]
pub struct Tier3Outcome {
    pub rules: Vec<RuleFinding>,
    pub claims: Vec<ClaimFinding>,
    pub cost: f64,
    pub tokens: u64,
    pub latency_ms: u64,
    /// Outbound calls dispatched (every audited attempt)
    pub attempts: usize,
    /// At least one batch was skipped because the cost ceiling was reached
    pub budget_exhausted: bool,
}

impl Tier3Outcome {
    pub fn fully_verified(&self) -> bool {
        self.rules.iter().all(|f| f.outcome.is_verified())
            && self.claims.iter().all(|f| f.outcome.is_verified())
    }

    pub fn unverified_count(&self) -> usize {
        self.rules.iter().filter(|f| !f.outcome.is_verified()).count()
            + self.claims.iter().filter(|f| !f.outcome.is_verified()).count()
    }

    /// Priority-weighted mean of verified rule scores
    ///
    /// Unverified rules are left out entirely. `None` when nothing was verified.
    pub fn weighted_rule_score(&self) -> Option<f64> {
        let mut weighted = 0.0;
        let mut weights = 0.0;
        for finding in &self.rules {
            if let Finding::Verified { verdict, .. } = &finding.outcome {
                let weight = if finding.rule.priority_score > 0.0 {
                    finding.rule.priority_score
                } else {
                    1.0
                };
                weighted += weight * verdict.score.clamp(0.0, 1.0);
                weights += weight;
            }
        }
        (weights > 0.0).then(|| weighted / weights)
    }

    /// Share of verified claims the content supports
    pub fn claim_support_ratio(&self) -> Option<f64> {
        let verified: Vec<&ClaimVerdict> = self
            .claims
            .iter()
            .filter_map(|f| match &f.outcome {
                Finding::Verified { verdict, .. } => Some(verdict),
                Finding::Unverified { .. } => None,
            })
            .collect();
        if verified.is_empty() {
            return None;
        }
        let supported = verified.iter().filter(|v| v.supported).count();
        Some(supported as f64 / verified.len() as f64)
    }

    /// Claims with their provenance, unsourced where no verdict arrived
    pub fn claim_candidates(&self) -> Vec<ClaimCandidate> {
        self.claims
            .iter()
            .map(|f| match &f.outcome {
                Finding::Verified { verdict, audit_id } => ClaimCandidate {
                    text: f.text.clone(),
                    source_audit_id: Some(*audit_id),
                    confidence_level: ConfidenceLevel::from_score(verdict.confidence),
                    supported: Some(verdict.supported),
                },
                Finding::Unverified { .. } => ClaimCandidate::unverified(f.text.clone()),
            })
            .collect()
    }

    /// Tier 3 result; a cached outcome reports no new cost
    pub fn to_tier_result(&self, cached: bool) -> TierResult {
        let mut result = TierResult::empty(Tier::Three);
        result.rules_checked = self.rules.len();

        for finding in &self.rules {
            match &finding.outcome {
                Finding::Verified { verdict, .. } if verdict.passed => result.rules_passed += 1,
                Finding::Verified { verdict, .. } => {
                    let message = verdict
                        .message
                        .clone()
                        .unwrap_or_else(|| finding.rule.description.clone());
                    let mut violation = Violation::for_rule(&finding.rule, message);
                    // Tier 3 affects the score through the weighted mean only
                    violation.penalty = 0.0;
                    result.violations.push(violation);
                }
                Finding::Unverified { reason } => {
                    result
                        .violations
                        .push(Violation::unverified(&finding.rule, reason.clone()));
                }
            }
        }

        let mut sub_scores = BTreeMap::new();
        if let Some(score) = self.weighted_rule_score() {
            sub_scores.insert(RULE_SCORE_KEY.to_string(), score);
        }
        if let Some(ratio) = self.claim_support_ratio() {
            sub_scores.insert(CLAIM_SUPPORT_KEY.to_string(), ratio);
        }
        result.sub_scores = sub_scores;

        if !cached {
            result.cost = self.cost;
            result.tokens = self.tokens;
            result.latency_ms = self.latency_ms;
        }
        result
    }
}

/// One outbound call's worth of checks
#[derive(Debug, Clone)]
struct Batch {
    index: usize,
    rules: Vec<Rule>,
    /// (global claim index, text)
    claims: Vec<(usize, String)>,
}

#[derive(Debug)]
enum BatchOutcome {
    Answered {
        rules: Vec<RuleVerdict>,
        claims: Vec<ClaimVerdict>,
        audit_id: Uuid,
    },
    Failed {
        reason: String,
    },
    BudgetExhausted,
}

#[derive(Debug)]
struct BatchReport {
    batch: Batch,
    outcome: BatchOutcome,
    cost: f64,
    tokens: u64,
    attempts: usize,
}

/// Split checks so the call count is max(ceil(rules/R), ceil(claims/C))
fn plan_batches(job: &Tier3Job, max_rules: usize, max_claims: usize) -> Vec<Batch> {
    let rule_batches = job.rules.len().div_ceil(max_rules);
    let claim_batches = job.claims.len().div_ceil(max_claims);
    let count = rule_batches.max(claim_batches);

    (0..count)
        .map(|index| {
            let rules = job
                .rules
                .iter()
                .skip(index * max_rules)
                .take(max_rules)
                .cloned()
                .collect();
            let claims = job
                .claims
                .iter()
                .enumerate()
                .skip(index * max_claims)
                .take(max_claims)
                .map(|(i, text)| (i, text.clone()))
                .collect();
            Batch {
                index,
                rules,
                claims,
            }
        })
        .collect()
}

#[derive(Clone)]
pub struct Tier3Evaluator {
    providers: Vec<ProviderSlot>,
    recorder: AuditRecorder,
    settings: Tier3Settings,
}

impl Tier3Evaluator {
    pub fn new(providers: Vec<ProviderSlot>, recorder: AuditRecorder, settings: Tier3Settings) -> Self {
        Self {
            providers,
            recorder,
            settings,
        }
    }

    pub fn provider_count(&self) -> usize {
        self.providers.len()
    }

    /// Run every batch and join
    ///
    /// Returns `Err` only when the audit trail could not be written.
    pub async fn evaluate(
        &self,
        job: &Tier3Job,
        budget: &CostBudget,
        cancel: &CancellationToken,
    ) -> EngineResult<Tier3Outcome> {
        let start = Instant::now();
        let batches = plan_batches(
            job,
            self.settings.max_rules_per_call,
            self.settings.max_claims_per_call,
        );

        debug!(
            assessment_id = %job.assessment_id,
            rules = job.rules.len(),
            claims = job.claims.len(),
            batches = batches.len(),
            "Tier 3 batches planned"
        );

        let semaphore = Arc::new(Semaphore::new(self.settings.max_concurrency));
        let futures = batches.into_iter().map(|batch| {
            let semaphore = Arc::clone(&semaphore);
            async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return Ok(BatchReport {
                        batch,
                        outcome: BatchOutcome::Failed {
                            reason: "concurrency limiter closed".to_string(),
                        },
                        cost: 0.0,
                        tokens: 0,
                        attempts: 0,
                    });
                };
                self.run_batch(job, batch, budget, cancel).await
            }
        });

        let reports = join_all(futures)
            .await
            .into_iter()
            .collect::<EngineResult<Vec<BatchReport>>>()?;

        let outcome = assemble(job, reports, start.elapsed());
        info!(
            assessment_id = %job.assessment_id,
            attempts = outcome.attempts,
            cost = outcome.cost,
            unverified = outcome.unverified_count(),
            budget_exhausted = outcome.budget_exhausted,
            "Tier 3 complete"
        );
        Ok(outcome)
    }

    async fn run_batch(
        &self,
        job: &Tier3Job,
        batch: Batch,
        budget: &CostBudget,
        cancel: &CancellationToken,
    ) -> EngineResult<BatchReport> {
        let request = ProviderRequest {
            assessment_id: job.assessment_id,
            batch_index: batch.index,
            content: job.content.clone(),
            page_type: job.page_type.clone(),
            industry: job.industry.clone(),
            rule_checks: batch
                .rules
                .iter()
                .map(|r| RuleCheck {
                    rule_id: r.rule_id.clone(),
                    instruction: r.description.clone(),
                })
                .collect(),
            claim_checks: batch
                .claims
                .iter()
                .map(|(index, text)| ClaimCheck {
                    index: *index,
                    text: text.clone(),
                })
                .collect(),
        };
        let body = request.canonical_body();
        let prompt_chars = request.prompt().len();
        let deadline_ms = self.settings.call_deadline.as_millis() as u64;

        let mut cost = 0.0;
        let mut tokens = 0;
        let mut attempts = 0;
        let mut last_failure = "no providers configured".to_string();

        for slot in self.providers.iter().cycle().take(self.settings.max_attempts) {
            if cancel.is_cancelled() {
                last_failure = "assessment cancelled".to_string();
                break;
            }
            let provider = &slot.provider;
            let pricing = provider.pricing();

            let reservation = match budget.reserve(pricing.estimate(prompt_chars)).await {
                Ok(reservation) => reservation,
                Err(e) => {
                    warn!(
                        assessment_id = %job.assessment_id,
                        batch = batch.index,
                        provider = provider.name(),
                        error = %e,
                        "Cost ceiling reached, skipping remaining Tier 3 checks"
                    );
                    return Ok(BatchReport {
                        batch,
                        outcome: BatchOutcome::BudgetExhausted,
                        cost,
                        tokens,
                        attempts,
                    });
                }
            };

            slot.acquire().await;

            let pending = match self
                .recorder
                .begin(
                    job.assessment_id,
                    provider.name(),
                    provider.endpoint(),
                    &job.content_hash,
                    &body,
                )
                .await
            {
                Ok(pending) => pending,
                Err(e) => {
                    budget.settle(reservation, 0.0).await;
                    return Err(e);
                }
            };
            attempts += 1;

            match tokio::time::timeout(self.settings.call_deadline, provider.complete(&request)).await {
                Ok(Ok(reply)) => {
                    let usage = reply.response.usage();
                    let call_cost = pricing.cost(&usage);
                    let recorded = self
                        .recorder
                        .complete_success(&pending, &reply, call_cost, usage.total())
                        .await;
                    budget.settle(reservation, call_cost).await;
                    recorded?;
                    cost += call_cost;
                    tokens += usage.total();

                    match reply.response {
                        ProviderResponse::Verdicts { rules, claims, .. } => {
                            debug!(
                                assessment_id = %job.assessment_id,
                                batch = batch.index,
                                provider = provider.name(),
                                cost = call_cost,
                                "Tier 3 batch answered"
                            );
                            return Ok(BatchReport {
                                batch,
                                outcome: BatchOutcome::Answered {
                                    rules,
                                    claims,
                                    audit_id: pending.audit_id,
                                },
                                cost,
                                tokens,
                                attempts,
                            });
                        }
                        ProviderResponse::Refused { reason, .. } => {
                            warn!(
                                assessment_id = %job.assessment_id,
                                batch = batch.index,
                                provider = provider.name(),
                                reason = %reason,
                                "Provider refused, falling back"
                            );
                            last_failure = format!("{} refused: {}", provider.name(), reason);
                        }
                    }
                }
                Ok(Err(err)) => {
                    let call_cost = pricing.failed_attempt_cost();
                    let recorded = self
                        .recorder
                        .complete_failure(
                            &pending,
                            err.audit_status(),
                            err.http_status(),
                            &err.to_string(),
                            call_cost,
                        )
                        .await;
                    budget.settle(reservation, call_cost).await;
                    recorded?;
                    cost += call_cost;
                    last_failure = format!("{}: {}", provider.name(), err);

                    if !err.is_retriable() {
                        warn!(
                            assessment_id = %job.assessment_id,
                            batch = batch.index,
                            provider = provider.name(),
                            error = %err,
                            "Provider error is not retriable, ending waterfall"
                        );
                        break;
                    }
                    warn!(
                        assessment_id = %job.assessment_id,
                        batch = batch.index,
                        provider = provider.name(),
                        error = %err,
                        "Provider failed, falling back"
                    );
                }
                Err(_) => {
                    let call_cost = pricing.failed_attempt_cost();
                    let message = format!("deadline of {} ms exceeded", deadline_ms);
                    let recorded = self
                        .recorder
                        .complete_failure(&pending, AuditStatus::Timeout, None, &message, call_cost)
                        .await;
                    budget.settle(reservation, call_cost).await;
                    recorded?;
                    cost += call_cost;
                    last_failure = format!("{} timed out after {} ms", provider.name(), deadline_ms);
                    warn!(
                        assessment_id = %job.assessment_id,
                        batch = batch.index,
                        provider = provider.name(),
                        deadline_ms,
                        "Provider timed out, falling back"
                    );
                }
            }
        }

        Ok(BatchReport {
            batch,
            outcome: BatchOutcome::Failed {
                reason: last_failure,
            },
            cost,
            tokens,
            attempts,
        })
    }
}

fn assemble(job: &Tier3Job, reports: Vec<BatchReport>, elapsed: Duration) -> Tier3Outcome {
    let mut outcome = Tier3Outcome {
        rules: Vec::with_capacity(job.rules.len()),
        claims: Vec::with_capacity(job.claims.len()),
        cost: 0.0,
        tokens: 0,
        latency_ms: elapsed.as_millis() as u64,
        attempts: 0,
        budget_exhausted: false,
    };

    for report in reports {
        outcome.cost += report.cost;
        outcome.tokens += report.tokens;
        outcome.attempts += report.attempts;

        let batch = report.batch;
        match report.outcome {
            BatchOutcome::Answered {
                rules,
                claims,
                audit_id,
            } => {
                for rule in batch.rules {
                    let finding = match rules.iter().find(|v| v.rule_id == rule.rule_id) {
                        Some(verdict) => Finding::Verified {
                            verdict: verdict.clone(),
                            audit_id,
                        },
                        None => Finding::Unverified {
                            reason: "provider returned no verdict".to_string(),
                        },
                    };
                    outcome.rules.push(RuleFinding { rule, outcome: finding });
                }
                for (index, text) in batch.claims {
                    let finding = match claims.iter().find(|v| v.index == index) {
                        Some(verdict) => Finding::Verified {
                            verdict: verdict.clone(),
                            audit_id,
                        },
                        None => Finding::Unverified {
                            reason: "provider returned no verdict".to_string(),
                        },
                    };
                    outcome.claims.push(ClaimFinding { text, outcome: finding });
                }
            }
            BatchOutcome::Failed { reason } => {
                outcome.rules.extend(batch.rules.into_iter().map(|rule| RuleFinding {
                    rule,
                    outcome: Finding::Unverified {
                        reason: reason.clone(),
                    },
                }));
                outcome.claims.extend(batch.claims.into_iter().map(|(_, text)| ClaimFinding {
                    text,
                    outcome: Finding::Unverified {
                        reason: reason.clone(),
                    },
                }));
            }
            BatchOutcome::BudgetExhausted => {
                outcome.budget_exhausted = true;
                let reason = "cost ceiling reached".to_string();
                outcome.rules.extend(batch.rules.into_iter().map(|rule| RuleFinding {
                    rule,
                    outcome: Finding::Unverified {
                        reason: reason.clone(),
                    },
                }));
                outcome.claims.extend(batch.claims.into_iter().map(|(_, text)| ClaimFinding {
                    text,
                    outcome: Finding::Unverified {
                        reason: reason.clone(),
                    },
                }));
            }
        }
    }
    outcome
}
