// =============================================================================
// WaitBuffer (C8)
// =============================================================================
//
// Concurrent map id -> WaitItem guarded by one reentrant-style lock
// (`parking_lot::Mutex`, matching the teacher's single-mutex-per-shared-map
// convention), grounded on `original_source/wait_buffer.py`. `add` returns a
// new uuid; `increment_reeval` is a single read-modify-write under the lock
// so the Revaluator never races itself across the two loops described in
// spec.md §4.8.
// =============================================================================

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use tracing::info;
use uuid::Uuid;

use crate::decision::AiDecisionRecord;
use crate::scoring::WaitScope;
use crate::signal::Signal;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitStatus {
    Waiting,
    Approved,
    Rejected,
    Timeout,
}

#[derive(Debug, Clone)]
pub struct WaitItem {
    pub id: Uuid,
    pub entry_signals: Vec<Signal>,
    pub ai_result: AiDecisionRecord,
    pub wait_scope: WaitScope,
    pub wait_condition: String,
    pub original_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub reeval_count: u32,
    pub status: WaitStatus,
}

pub struct WaitBuffer {
    items: Mutex<HashMap<Uuid, WaitItem>>,
    max_reeval_count: u32,
    expiry: ExpiryConfig,
}

#[derive(Debug, Clone, Copy)]
pub struct ExpiryConfig {
    pub next_bar: Duration,
    pub structure_needed: Duration,
    pub cooldown: Duration,
}

impl Default for ExpiryConfig {
    fn default() -> Self {
        Self {
            next_bar: Duration::seconds(360),
            structure_needed: Duration::seconds(900),
            cooldown: Duration::seconds(180),
        }
    }
}

impl WaitBuffer {
    pub fn new(max_reeval_count: u32, expiry: ExpiryConfig) -> Self {
        Self { items: Mutex::new(HashMap::new()), max_reeval_count, expiry }
    }

    pub fn add(&self, entry_signals: Vec<Signal>, ai_result: AiDecisionRecord, wait_scope: WaitScope, wait_condition: String) -> Uuid {
        let id = Uuid::new_v4();
        let item = WaitItem {
            id,
            entry_signals,
            original_reason: ai_result.reason.clone(),
            ai_result,
            wait_scope,
            wait_condition,
            created_at: Utc::now(),
            reeval_count: 0,
            status: WaitStatus::Waiting,
        };
        self.items.lock().insert(id, item);
        info!(id = %id, "wait buffer item added");
        id
    }

    pub fn get_all(&self) -> Vec<WaitItem> {
        self.items.lock().values().cloned().collect()
    }

    pub fn get_by_scope(&self, scope: WaitScope) -> Vec<WaitItem> {
        self.items
            .lock()
            .values()
            .filter(|i| i.status == WaitStatus::Waiting && i.wait_scope == scope)
            .cloned()
            .collect()
    }

    pub fn get_waiting(&self) -> Vec<WaitItem> {
        self.items.lock().values().filter(|i| i.status == WaitStatus::Waiting).cloned().collect()
    }

    pub fn expire_item(&self, id: Uuid) {
        if let Some(item) = self.items.lock().get_mut(&id) {
            item.status = WaitStatus::Timeout;
        }
        info!(id = %id, "wait item expired");
    }

    pub fn resolve_item(&self, id: Uuid, status: WaitStatus) {
        if let Some(item) = self.items.lock().get_mut(&id) {
            item.status = status;
        }
    }

    /// Re-scored as `wait` again: update scope/condition in place without
    /// resolving the item (revaluator.py: "再度 wait → wait_scope 更新のみ").
    pub fn update_scope(&self, id: Uuid, wait_scope: WaitScope, wait_condition: String) {
        if let Some(item) = self.items.lock().get_mut(&id) {
            item.wait_scope = wait_scope;
            item.wait_condition = wait_condition;
        }
    }

    /// Single read-modify-write under the lock (spec.md §4.8, §8 property 7).
    pub fn increment_reeval(&self, id: Uuid) -> u32 {
        let mut items = self.items.lock();
        if let Some(item) = items.get_mut(&id) {
            item.reeval_count += 1;
            item.reeval_count
        } else {
            0
        }
    }

    pub fn cleanup_done(&self) {
        self.items.lock().retain(|_, v| v.status == WaitStatus::Waiting);
    }

    pub fn is_expired(&self, item: &WaitItem) -> bool {
        let elapsed = Utc::now() - item.created_at;
        let expiry = match item.wait_scope {
            WaitScope::NextBar => self.expiry.next_bar,
            WaitScope::StructureNeeded => self.expiry.structure_needed,
            WaitScope::Cooldown => self.expiry.cooldown,
        };
        elapsed >= expiry
    }

    pub fn should_reject_by_reeval(&self, item: &WaitItem) -> bool {
        item.reeval_count >= self.max_reeval_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::structurer::{
        DataCompleteness, Momentum, PriceStructure, Regime, RegimeClass as Rc, Session, SignalQuality, ZoneInteraction,
    };
    use std::collections::HashMap as Map;

    fn dummy_decision() -> AiDecisionRecord {
        AiDecisionRecord {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            signal_ids: vec![],
            decision: "wait".into(),
            score: 0.3,
            reason: None,
            wait_scope: Some("structure_needed".into()),
            wait_condition: Some("structure_needed".into()),
            structured_data: crate::structurer::NormalizedSchema {
                regime: Regime { classification: Rc::Trend, adx: None, adx_rising: None, atr_expanding: None, squeeze: None },
                price_structure: PriceStructure::default(),
                zone_interaction: ZoneInteraction::default(),
                momentum: Momentum { rsi: None, rsi_zone: None, trend_aligned: None },
                signal_quality: SignalQuality { source: "".into(), bar_close_confirmed: false, session: Session::London, tv_confidence: None, pattern_similarity: None },
                data_completeness: DataCompleteness { connected: true, fields_missing: vec![] },
            },
            score_breakdown: Map::new(),
            setup_type: "standard".into(),
            session: "london".into(),
        }
    }

    #[test]
    fn reeval_count_monotonically_increases() {
        let buffer = WaitBuffer::new(3, ExpiryConfig::default());
        let id = buffer.add(vec![], dummy_decision(), WaitScope::StructureNeeded, "cond".into());
        assert_eq!(buffer.increment_reeval(id), 1);
        assert_eq!(buffer.increment_reeval(id), 2);
        assert_eq!(buffer.increment_reeval(id), 3);
    }

    #[test]
    fn should_reject_once_at_max_reeval() {
        let buffer = WaitBuffer::new(2, ExpiryConfig::default());
        let id = buffer.add(vec![], dummy_decision(), WaitScope::Cooldown, "cond".into());
        buffer.increment_reeval(id);
        buffer.increment_reeval(id);
        let item = buffer.get_all().into_iter().find(|i| i.id == id).unwrap();
        assert!(buffer.should_reject_by_reeval(&item));
    }

    #[test]
    fn cleanup_done_removes_non_waiting_items() {
        let buffer = WaitBuffer::new(3, ExpiryConfig::default());
        let id = buffer.add(vec![], dummy_decision(), WaitScope::NextBar, "cond".into());
        buffer.resolve_item(id, WaitStatus::Rejected);
        buffer.cleanup_done();
        assert!(buffer.get_all().is_empty());
    }
}
