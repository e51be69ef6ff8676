// =============================================================================
// AiDecisionRecord — auditable record of every scoring decision
// =============================================================================
//
// Adapted from the teacher's `decision_envelope.rs`: every signal batch that
// reaches the ScoringEngine produces one auditable row, shaped after
// spec.md §6's `ai_decisions` table rather than the teacher's multi-layer
// verdict strings (this pipeline has one scoring layer, not four).
// =============================================================================

use serde::Serialize;
use uuid::Uuid;

use crate::scoring::{Decision, DecisionResult, WaitScope};
use crate::signal::Signal;
use crate::structurer::NormalizedSchema;

#[derive(Debug, Clone, Serialize)]
pub struct AiDecisionRecord {
    pub id: Uuid,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub signal_ids: Vec<String>,
    pub decision: String,
    pub score: f64,
    pub reason: Option<String>,
    pub wait_scope: Option<String>,
    pub wait_condition: Option<String>,
    pub structured_data: NormalizedSchema,
    pub score_breakdown: std::collections::HashMap<String, f64>,
    pub setup_type: String,
    pub session: String,
}

impl AiDecisionRecord {
    pub fn new(entry_signals: &[Signal], schema: NormalizedSchema, result: DecisionResult, setup_type: &str) -> Self {
        let signal_ids = entry_signals.iter().map(|s| format!("{}@{}", s.source, s.received_at.timestamp_millis())).collect();
        let decision = match result.decision {
            Decision::Approve => "approve",
            Decision::Wait => "wait",
            Decision::Reject => "reject",
        };
        let wait_scope = result.wait_condition.map(|w| match w {
            WaitScope::NextBar => "next_bar".to_string(),
            WaitScope::StructureNeeded => "structure_needed".to_string(),
            WaitScope::Cooldown => "cooldown".to_string(),
        });
        let session = format!("{:?}", schema.signal_quality.session).to_lowercase();

        Self {
            id: Uuid::new_v4(),
            created_at: chrono::Utc::now(),
            signal_ids,
            decision: decision.to_string(),
            score: result.score,
            reason: result.reject_reasons.first().cloned(),
            wait_scope: wait_scope.clone(),
            wait_condition: wait_scope,
            structured_data: schema,
            score_breakdown: result.breakdown,
            setup_type: setup_type.to_string(),
            session,
        }
    }
}
