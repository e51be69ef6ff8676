// =============================================================================
// Broker abstraction
// =============================================================================
//
// The broker/MT SDK binding is an external interface (spec.md §6) — out of
// scope to implement concretely. This module defines the abstract surface
// every component depends on instead of a concrete vendor client, grounded
// on the shape of the teacher's `binance/client.rs` generalized to the
// operations spec.md §6 actually lists: symbol metadata, current tick,
// OHLC, account info, open positions, order submission, calendar events.
//
// `MockBroker` is the in-memory test double used throughout the test suite
// for components that need *some* broker to drive against.
// =============================================================================

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::errors::TransientBrokerError;
use crate::market_data::{Candle, Timeframe};
use crate::signal::Direction;

#[derive(Debug, Clone, Copy)]
pub struct Tick {
    pub bid: f64,
    pub ask: f64,
    pub time: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct SymbolInfo {
    pub symbol: String,
    pub contract_size: f64,
    pub min_lot: f64,
    pub lot_step: f64,
    pub digits: u32,
}

#[derive(Debug, Clone, Copy)]
pub struct AccountInfo {
    pub balance: f64,
    pub equity: f64,
    pub free_margin: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderType {
    Market,
    Limit,
}

#[derive(Debug, Clone)]
pub struct OrderRequest {
    pub symbol: String,
    pub direction: Direction,
    pub order_type: OrderType,
    pub lot_size: f64,
    pub price: Option<f64>,
    pub sl: f64,
    pub tp: f64,
}

#[derive(Debug, Clone)]
pub struct OrderResult {
    pub ticket: u64,
    pub fill_price: f64,
}

#[derive(Debug, Clone)]
pub struct ModifyRequest {
    pub ticket: u64,
    pub sl: f64,
    pub tp: f64,
}

#[derive(Debug, Clone)]
pub struct BrokerPosition {
    pub ticket: u64,
    pub symbol: String,
    pub direction: Direction,
    pub lot_size: f64,
    pub open_price: f64,
    pub sl: f64,
    pub tp: f64,
}

#[derive(Debug, Clone)]
pub struct CalendarEvent {
    pub name: String,
    pub time: DateTime<Utc>,
    pub impact: String,
}

/// Abstract broker surface (spec.md §6). A concrete binding (MT5, a FIX
/// gateway, a paper-trading simulator) implements this trait; nothing
/// upstream of it depends on the vendor protocol.
#[async_trait]
pub trait Broker: Send + Sync {
    async fn symbol_info(&self, symbol: &str) -> Result<SymbolInfo, TransientBrokerError>;
    async fn tick(&self, symbol: &str) -> Result<Tick, TransientBrokerError>;
    async fn ohlc(&self, symbol: &str, timeframe: Timeframe, bars: usize) -> Result<Vec<Candle>, TransientBrokerError>;
    async fn account_info(&self) -> Result<AccountInfo, TransientBrokerError>;
    async fn open_positions(&self, symbol: &str) -> Result<Vec<BrokerPosition>, TransientBrokerError>;
    async fn send_order(&self, request: OrderRequest) -> Result<OrderResult, TransientBrokerError>;
    async fn modify_order(&self, request: ModifyRequest) -> Result<(), TransientBrokerError>;
    async fn close_position(&self, ticket: u64, lots: f64) -> Result<(), TransientBrokerError>;
    async fn close_all(&self, symbol: &str) -> Result<(), TransientBrokerError>;
    async fn calendar_events(&self, symbol: &str, within: chrono::Duration) -> Result<Vec<CalendarEvent>, TransientBrokerError>;
    async fn is_connected(&self) -> bool;
    /// Attempt to reconnect. Used by HealthMonitor (C12).
    async fn reconnect(&self) -> Result<(), TransientBrokerError>;
    async fn is_market_open(&self, symbol: &str) -> Result<bool, TransientBrokerError>;
}

/// In-memory test double. Every method returns data pre-seeded by the
/// caller via the public fields — no network, no timers.
pub struct MockBroker {
    pub connected: std::sync::atomic::AtomicBool,
    pub tick: parking_lot::Mutex<Tick>,
    pub candles: parking_lot::Mutex<Vec<Candle>>,
    pub account: parking_lot::Mutex<AccountInfo>,
    pub positions: parking_lot::Mutex<Vec<BrokerPosition>>,
    pub next_ticket: std::sync::atomic::AtomicU64,
    pub market_open: std::sync::atomic::AtomicBool,
    pub calendar: parking_lot::Mutex<Vec<CalendarEvent>>,
}

impl Default for MockBroker {
    fn default() -> Self {
        Self {
            connected: std::sync::atomic::AtomicBool::new(true),
            tick: parking_lot::Mutex::new(Tick { bid: 5200.0, ask: 5200.2, time: Utc::now() }),
            candles: parking_lot::Mutex::new(Vec::new()),
            account: parking_lot::Mutex::new(AccountInfo { balance: 10_000.0, equity: 10_000.0, free_margin: 9_000.0 }),
            positions: parking_lot::Mutex::new(Vec::new()),
            next_ticket: std::sync::atomic::AtomicU64::new(1),
            market_open: std::sync::atomic::AtomicBool::new(true),
            calendar: parking_lot::Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl Broker for MockBroker {
    async fn symbol_info(&self, symbol: &str) -> Result<SymbolInfo, TransientBrokerError> {
        Ok(SymbolInfo { symbol: symbol.to_string(), contract_size: 100.0, min_lot: 0.01, lot_step: 0.01, digits: 2 })
    }

    async fn tick(&self, _symbol: &str) -> Result<Tick, TransientBrokerError> {
        Ok(*self.tick.lock())
    }

    async fn ohlc(&self, _symbol: &str, _timeframe: Timeframe, bars: usize) -> Result<Vec<Candle>, TransientBrokerError> {
        let candles = self.candles.lock();
        let start = candles.len().saturating_sub(bars);
        Ok(candles[start..].to_vec())
    }

    async fn account_info(&self) -> Result<AccountInfo, TransientBrokerError> {
        Ok(*self.account.lock())
    }

    async fn open_positions(&self, symbol: &str) -> Result<Vec<BrokerPosition>, TransientBrokerError> {
        Ok(self.positions.lock().iter().filter(|p| p.symbol == symbol).cloned().collect())
    }

    async fn send_order(&self, request: OrderRequest) -> Result<OrderResult, TransientBrokerError> {
        let ticket = self.next_ticket.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        let fill_price = match request.direction {
            Direction::Buy => self.tick.lock().ask,
            Direction::Sell => self.tick.lock().bid,
        };
        self.positions.lock().push(BrokerPosition {
            ticket,
            symbol: request.symbol,
            direction: request.direction,
            lot_size: request.lot_size,
            open_price: fill_price,
            sl: request.sl,
            tp: request.tp,
        });
        Ok(OrderResult { ticket, fill_price })
    }

    async fn modify_order(&self, request: ModifyRequest) -> Result<(), TransientBrokerError> {
        let mut positions = self.positions.lock();
        let pos = positions.iter_mut().find(|p| p.ticket == request.ticket).ok_or_else(|| TransientBrokerError {
            operation: "modify_order".into(),
            detail: "ticket not found".into(),
        })?;
        pos.sl = request.sl;
        pos.tp = request.tp;
        Ok(())
    }

    async fn close_position(&self, ticket: u64, lots: f64) -> Result<(), TransientBrokerError> {
        let mut positions = self.positions.lock();
        if let Some(pos) = positions.iter_mut().find(|p| p.ticket == ticket) {
            pos.lot_size -= lots;
            if pos.lot_size <= 0.0 {
                positions.retain(|p| p.ticket != ticket);
            }
        }
        Ok(())
    }

    async fn close_all(&self, symbol: &str) -> Result<(), TransientBrokerError> {
        self.positions.lock().retain(|p| p.symbol != symbol);
        Ok(())
    }

    async fn calendar_events(&self, _symbol: &str, _within: chrono::Duration) -> Result<Vec<CalendarEvent>, TransientBrokerError> {
        Ok(self.calendar.lock().clone())
    }

    async fn is_connected(&self) -> bool {
        self.connected.load(std::sync::atomic::Ordering::SeqCst)
    }

    async fn reconnect(&self) -> Result<(), TransientBrokerError> {
        self.connected.store(true, std::sync::atomic::Ordering::SeqCst);
        Ok(())
    }

    async fn is_market_open(&self, _symbol: &str) -> Result<bool, TransientBrokerError> {
        Ok(self.market_open.load(std::sync::atomic::Ordering::SeqCst))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_send_order_registers_position() {
        let broker = MockBroker::default();
        let result = broker
            .send_order(OrderRequest {
                symbol: "GOLD".into(),
                direction: Direction::Buy,
                order_type: OrderType::Market,
                lot_size: 0.1,
                price: None,
                sl: 5190.0,
                tp: 5220.0,
            })
            .await
            .unwrap();
        assert_eq!(result.ticket, 1);
        let positions = broker.open_positions("GOLD").await.unwrap();
        assert_eq!(positions.len(), 1);
    }

    #[tokio::test]
    async fn mock_modify_preserves_ticket() {
        let broker = MockBroker::default();
        let result = broker
            .send_order(OrderRequest {
                symbol: "GOLD".into(),
                direction: Direction::Buy,
                order_type: OrderType::Market,
                lot_size: 0.1,
                price: None,
                sl: 5190.0,
                tp: 5220.0,
            })
            .await
            .unwrap();
        broker.modify_order(ModifyRequest { ticket: result.ticket, sl: 5195.0, tp: 5220.0 }).await.unwrap();
        let positions = broker.open_positions("GOLD").await.unwrap();
        assert_eq!(positions[0].sl, 5195.0);
    }
}
