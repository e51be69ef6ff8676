// =============================================================================
// PositionManager (C11)
// =============================================================================
//
// Per-ticket BE / partial-close / trailing progression, grounded on
// `original_source/position_manager.py::_manage` and kept in the teacher's
// RwLock-guarded-map shape (`position_engine.rs`'s `RwLock<Vec<Position>>`
// generalized to `RwLock<HashMap<ticket, ManagedPosition>>` per spec.md §5:
// "PositionManager's map — one mutex, per-tick collect-to-remove then
// reacquire to delete"). The three checks are independent `if`s run every
// tick, not an `elif` chain gated on a derived state — a single large
// favorable move can apply BE and qualify for partial close in one tick
// (SPEC_FULL.md §4.7).
//
// Every SL update (break-even application and trailing ratchet) MUST carry
// the take-profit alongside it — the broker interface has no partial-modify
// call (SPEC_FULL.md §4.7 supplement).
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tracing::{info, warn};

use crate::broker::{Broker, ModifyRequest};
use crate::signal::Direction;

#[derive(Debug, Clone)]
pub struct ManagedPosition {
    pub ticket: u64,
    pub direction: Direction,
    pub entry_price: f64,
    pub lot_size: f64,
    pub sl: f64,
    pub tp: f64,
    pub atr_at_entry: f64,
    /// Best (most favorable) price seen since entry — feeds the trailing
    /// calculation once `trailing_active` (spec.md §4.7).
    pub max_favorable_price: f64,
    pub be_applied: bool,
    pub partial_closed: bool,
    pub trailing_active: bool,
    pub remaining_lots: f64,
    pub entered_at: DateTime<Utc>,
}

impl ManagedPosition {
    pub fn new(ticket: u64, direction: Direction, entry_price: f64, lot_size: f64, sl: f64, tp: f64, atr_at_entry: f64) -> Self {
        Self {
            ticket,
            direction,
            entry_price,
            lot_size,
            sl,
            tp,
            atr_at_entry,
            max_favorable_price: entry_price,
            be_applied: false,
            partial_closed: false,
            trailing_active: false,
            remaining_lots: lot_size,
            entered_at: Utc::now(),
        }
    }

    fn favorable_move(&self, price: f64) -> f64 {
        match self.direction {
            Direction::Buy => price - self.entry_price,
            Direction::Sell => self.entry_price - price,
        }
    }

    fn is_more_favorable(&self, price: f64) -> bool {
        match self.direction {
            Direction::Buy => price > self.max_favorable_price,
            Direction::Sell => price < self.max_favorable_price,
        }
    }

}

#[derive(Debug, Clone, Copy)]
pub struct PositionManagerConfig {
    pub be_trigger_atr_mult: f64,
    pub be_buffer: f64,
    pub partial_tp_atr_mult: f64,
    pub partial_close_ratio: f64,
    pub trailing_step_atr_mult: f64,
}

impl Default for PositionManagerConfig {
    fn default() -> Self {
        Self {
            be_trigger_atr_mult: 1.0,
            be_buffer: 2.0,
            partial_tp_atr_mult: 2.0,
            partial_close_ratio: 0.5,
            trailing_step_atr_mult: 1.5,
        }
    }
}

pub struct PositionManager {
    positions: RwLock<HashMap<u64, ManagedPosition>>,
    config: PositionManagerConfig,
}

impl PositionManager {
    pub fn new(config: PositionManagerConfig) -> Arc<Self> {
        Arc::new(Self { positions: RwLock::new(HashMap::new()), config })
    }

    pub fn register(&self, position: ManagedPosition) {
        info!(ticket = position.ticket, "position registered with position manager");
        self.positions.write().insert(position.ticket, position);
    }

    pub fn get(&self, ticket: u64) -> Option<ManagedPosition> {
        self.positions.read().get(&ticket).cloned()
    }

    pub fn open_tickets(&self) -> Vec<u64> {
        self.positions.read().keys().copied().collect()
    }

    /// One tick of the per-position state machine (spec.md §4.7), run
    /// against a consistent per-tick snapshot: the ticket set is copied
    /// under the lock then released before any broker call, and removals
    /// (broker-absent tickets) are applied on a second, brief lock
    /// acquisition (spec.md §5).
    pub async fn tick(&self, broker: &dyn Broker, symbol: &str, min_lot: f64) {
        let tickets = self.open_tickets();
        let mut to_drop = Vec::new();

        for ticket in tickets {
            let Some(position) = self.get(ticket) else { continue };

            let broker_positions = match broker.open_positions(symbol).await {
                Ok(p) => p,
                Err(_) => continue,
            };
            if !broker_positions.iter().any(|p| p.ticket == ticket) {
                to_drop.push(ticket);
                continue;
            }

            let tick = match broker.tick(symbol).await {
                Ok(t) => t,
                Err(_) => continue,
            };
            let price = match position.direction {
                Direction::Buy => tick.bid,
                Direction::Sell => tick.ask,
            };

            self.advance(broker, ticket, price, min_lot).await;
        }

        if !to_drop.is_empty() {
            let mut positions = self.positions.write();
            for ticket in to_drop {
                positions.remove(&ticket);
            }
        }
    }

    async fn advance(&self, broker: &dyn Broker, ticket: u64, price: f64, min_lot: f64) {
        let mut position = match self.get(ticket) {
            Some(p) => p,
            None => return,
        };

        if position.is_more_favorable(price) {
            position.max_favorable_price = price;
        }

        let u = position.favorable_move(price);
        let a = position.atr_at_entry;

        // Non-exclusive per-tick ordering (not `elif`): BE, partial, and
        // trailing are each re-checked every tick rather than gated behind
        // the derived state, so a single large favorable move can apply BE
        // and qualify for partial close in the same tick
        // (SPEC_FULL.md §4.7, `position_manager.py::_manage`).
        if !position.be_applied && u >= a * self.config.be_trigger_atr_mult {
            let new_sl = match position.direction {
                Direction::Buy => position.entry_price + self.config.be_buffer,
                Direction::Sell => position.entry_price - self.config.be_buffer,
            };
            match broker.modify_order(ModifyRequest { ticket, sl: new_sl, tp: position.tp }).await {
                Ok(()) => {
                    position.sl = new_sl;
                    position.be_applied = true;
                    info!(ticket, new_sl, "break-even applied");
                }
                Err(e) => warn!(ticket, error = %e, "break-even modify failed, retrying next tick"),
            }
        }

        if !position.partial_closed && u >= a * self.config.partial_tp_atr_mult {
            let close_qty = position.lot_size * self.config.partial_close_ratio;
            if close_qty < min_lot {
                // Skip the broker close but still advance the state machine
                // (spec.md §8 S6).
                position.partial_closed = true;
                position.trailing_active = true;
                info!(ticket, close_qty, min_lot, "partial close skipped (below broker min lot), trailing engaged");
            } else {
                match broker.close_position(ticket, close_qty).await {
                    Ok(()) => {
                        position.remaining_lots -= close_qty;
                        position.partial_closed = true;
                        position.trailing_active = true;
                        info!(ticket, close_qty, remaining = position.remaining_lots, "partial close executed");
                    }
                    Err(e) => warn!(ticket, error = %e, "partial close failed, retrying next tick"),
                }
            }
        }

        if position.partial_closed {
            let candidate_sl = match position.direction {
                Direction::Buy => position.max_favorable_price - a * self.config.trailing_step_atr_mult,
                Direction::Sell => position.max_favorable_price + a * self.config.trailing_step_atr_mult,
            };
            let more_favorable = match position.direction {
                Direction::Buy => candidate_sl > position.sl,
                Direction::Sell => candidate_sl < position.sl,
            };
            if more_favorable {
                match broker.modify_order(ModifyRequest { ticket, sl: candidate_sl, tp: position.tp }).await {
                    Ok(()) => {
                        position.sl = candidate_sl;
                        info!(ticket, new_sl = candidate_sl, "trailing stop ratcheted");
                    }
                    Err(e) => warn!(ticket, error = %e, "trailing stop modify failed, retrying next tick"),
                }
            }
        }

        self.positions.write().insert(ticket, position);
    }
}
