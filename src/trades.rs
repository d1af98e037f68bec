// ===============================
// src/trades.rs (execution -> round-trip trade aggregation)
// ===============================
//
// One TradeAggregator per (security, provider). Executions extend the
// position (new trade layer) or offset it (FIFO match against the oldest
// open layers; a remainder after all layers close flips direction into a
// fresh layer). Position always equals the signed sum of open remainders.
//
// Not synchronized: the owner must deliver at most one execution at a
// time per aggregator, in the provider's order. Duplicate execution IDs
// are not filtered.
//
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::domain::{Execution, Security, Side, TradeFill};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AggregationError {
    #[error("execution {execution_id}: size must be positive, got {qty}")]
    InvalidSize { execution_id: String, qty: i64 },
    #[error("execution {execution_id} for {actual} routed to aggregator for {expected}")]
    WrongInstrument { execution_id: String, expected: String, actual: String },
    #[error("position {position} is open but no trade is left to offset")]
    NoOpenTrade { position: i64 },
    #[error("execution {execution_id}: position {position} plus {qty} overflows")]
    PositionOverflow { execution_id: String, position: i64, qty: i64 },
}

/// Sequence source for trade IDs, shared by every aggregator of a registry.
#[derive(Debug, Default)]
pub struct IdGenerator {
    next: AtomicU64,
}

impl IdGenerator {
    pub fn starting_at(first: u64) -> Self { Self { next: AtomicU64::new(first) } }
    pub fn next_id(&self) -> u64 { self.next.fetch_add(1, Ordering::Relaxed) }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trade {
    pub trade_id: u64,
    pub security: Security,
    pub provider: String,
    pub side: Side,
    pub open: TradeFill,
    /// Offsetting fills in arrival order.
    pub fills: Vec<TradeFill>,
    pub remaining: i64,
    pub closed_ts_ns: Option<i128>,
}

impl Trade {
    pub fn new(trade_id: u64, security: Security, provider: String, side: Side, open: TradeFill) -> Self {
        let remaining = open.qty;
        Self { trade_id, security, provider, side, open, fills: Vec::new(), remaining, closed_ts_ns: None }
    }

    /// Applies an offsetting fill and returns the quantity this trade could
    /// not absorb.
    pub fn add(&mut self, execution_id: &str, qty: i64, px: i64, ts_ns: i128) -> i64 {
        let used = qty.min(self.remaining);
        if used > 0 {
            self.fills.push(TradeFill { execution_id: execution_id.to_string(), qty: used, px, ts_ns });
            self.remaining -= used;
            if self.remaining == 0 {
                self.closed_ts_ns = Some(ts_ns);
            }
        }
        qty - used
    }

    pub fn is_complete(&self) -> bool { self.remaining == 0 }
    pub fn signed_remaining(&self) -> i64 { self.side.sign() * self.remaining }
    pub fn closed_qty(&self) -> i64 { self.open.qty - self.remaining }

    pub fn avg_exit_px(&self) -> Option<i64> {
        let qty = self.closed_qty();
        if qty == 0 {
            return None;
        }
        let notional: i128 = self.fills.iter().map(|f| f.px as i128 * f.qty as i128).sum();
        Some((notional / qty as i128) as i64)
    }

    /// (exit - entry) * qty over the closing fills, signed by trade side.
    /// Saturates at the i64 range.
    pub fn realized_pnl(&self) -> i64 {
        self.fills.iter().fold(0i64, |acc, f| {
            let leg = f.px.saturating_sub(self.open.px).saturating_mul(f.qty).saturating_mul(self.side.sign());
            acc.saturating_add(leg)
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionSnapshot {
    pub security: Security,
    pub provider: String,
    pub position: i64,
    pub open_trades: Vec<Trade>,
}

pub struct TradeAggregator {
    security: Security,
    provider: String,
    position: i64,
    trade_count: u64,
    open_trades: BTreeMap<u64, Trade>,
    ids: Arc<IdGenerator>,
}

impl TradeAggregator {
    pub fn new(security: Security, provider: String, ids: Arc<IdGenerator>) -> Self {
        Self { security, provider, position: 0, trade_count: 0, open_trades: BTreeMap::new(), ids }
    }

    pub fn security(&self) -> &Security { &self.security }
    pub fn position(&self) -> i64 { self.position }

    /// Open layers, oldest first.
    pub fn open_trades(&self) -> Vec<&Trade> { self.open_trades.values().collect() }

    pub fn snapshot(&self) -> PositionSnapshot {
        PositionSnapshot {
            security: self.security.clone(),
            provider: self.provider.clone(),
            position: self.position,
            open_trades: self.open_trades.values().cloned().collect(),
        }
    }

    /// Applies one execution and returns the trades it completed. A rejected
    /// execution leaves the state untouched.
    pub fn new_execution_arrived(&mut self, exec: &Execution) -> Result<Vec<Trade>, AggregationError> {
        self.validate(exec)?;

        let signed = exec.signed_qty();
        let fill = TradeFill {
            execution_id: exec.fill.execution_id.clone(),
            qty: exec.fill.qty,
            px: exec.fill.px,
            ts_ns: exec.fill.ts_ns,
        };
        let mut closed = Vec::new();

        if self.position == 0 {
            self.trade_count = 0;
            self.open_trades.clear();
            self.position = signed;
            self.open_trade(exec.fill.side.trade_side(), fill);
        } else if (signed > 0) == (self.position > 0) {
            self.position += signed;
            self.open_trade(Side::of(self.position), fill);
        } else {
            self.position += signed;
            self.offset(fill, &mut closed);
        }
        debug_assert_eq!(self.open_trades.values().map(Trade::signed_remaining).sum::<i64>(), self.position);

        debug!(
            security = %self.security,
            provider = %self.provider,
            exec_id = %exec.fill.execution_id,
            position = self.position,
            open = self.open_trades.len(),
            closed = closed.len(),
            "execution applied"
        );
        Ok(closed)
    }

    fn validate(&self, exec: &Execution) -> Result<(), AggregationError> {
        if exec.order.security != self.security || exec.order.provider != self.provider {
            return Err(AggregationError::WrongInstrument {
                execution_id: exec.fill.execution_id.clone(),
                expected: format!("{}/{}", self.security, self.provider),
                actual: format!("{}/{}", exec.order.security, exec.order.provider),
            });
        }
        if exec.fill.qty <= 0 {
            return Err(AggregationError::InvalidSize {
                execution_id: exec.fill.execution_id.clone(),
                qty: exec.fill.qty,
            });
        }
        if self.position.checked_add(exec.signed_qty()).is_none() {
            return Err(AggregationError::PositionOverflow {
                execution_id: exec.fill.execution_id.clone(),
                position: self.position,
                qty: exec.signed_qty(),
            });
        }
        if self.position != 0 && self.open_trades.is_empty() {
            return Err(AggregationError::NoOpenTrade { position: self.position });
        }
        Ok(())
    }

    fn open_trade(&mut self, side: Side, fill: TradeFill) {
        self.trade_count += 1;
        let trade = Trade::new(self.ids.next_id(), self.security.clone(), self.provider.clone(), side, fill);
        self.open_trades.insert(self.trade_count, trade);
    }

    // FIFO: oldest layer first, cascading what it cannot absorb
    fn offset(&mut self, fill: TradeFill, closed: &mut Vec<Trade>) {
        let mut qty = fill.qty;
        while let Some(mut oldest) = self.open_trades.first_entry() {
            let unused = oldest.get_mut().add(&fill.execution_id, qty, fill.px, fill.ts_ns);
            if !oldest.get().is_complete() {
                return;
            }
            closed.push(oldest.remove());
            if unused == 0 {
                return;
            }
            qty = unused;
        }
        // every layer closed and quantity is left: direction flipped
        let side = Side::of(self.position);
        self.open_trade(side, TradeFill { qty, ..fill });
    }
}
