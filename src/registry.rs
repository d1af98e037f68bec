// ===============================
// src/registry.rs (routing executions to aggregators)
// ===============================
use std::sync::Arc;

use ahash::AHashMap as HashMap;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};

use crate::domain::{Event, Execution, Security};
use crate::metrics::{EXECUTIONS, EXEC_REJECTED, OPEN_TRADES, POSITION_QTY, REALIZED_PNL, TRADES_CLOSED};
use crate::trades::{AggregationError, IdGenerator, PositionSnapshot, Trade, TradeAggregator};

/// Destination of completed trades.
pub trait TradeSink: Send + Sync {
    fn persist_trade(&self, trade: &Trade);
}

/// Hands trades to the post-trade task without blocking the execution path.
pub struct ChannelSink {
    tx: mpsc::Sender<Trade>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<Trade>) -> Self { Self { tx } }
}

impl TradeSink for ChannelSink {
    fn persist_trade(&self, trade: &Trade) {
        if let Err(e) = self.tx.try_send(trade.clone()) {
            error!(trade_id = trade.trade_id, err = %e, "trade handoff failed, trade dropped");
        }
    }
}

type Key = (Security, String);

pub struct TradeRegistry {
    aggregators: HashMap<Key, TradeAggregator>,
    ids: Arc<IdGenerator>,
    sink: Arc<dyn TradeSink>,
}

impl TradeRegistry {
    pub fn new(ids: Arc<IdGenerator>, sink: Arc<dyn TradeSink>) -> Self {
        Self { aggregators: HashMap::new(), ids, sink }
    }

    /// Routes one execution; returns how many trades it completed.
    pub fn on_execution(&mut self, exec: &Execution) -> Result<usize, AggregationError> {
        let provider = exec.order.provider.as_str();
        EXECUTIONS.with_label_values(&[provider]).inc();

        let key = (exec.order.security.clone(), exec.order.provider.clone());
        let ids = &self.ids;
        let agg = self.aggregators.entry(key).or_insert_with(|| {
            info!(security = %exec.order.security, %provider, "new trade aggregator");
            TradeAggregator::new(exec.order.security.clone(), exec.order.provider.clone(), ids.clone())
        });

        let closed = match agg.new_execution_arrived(exec) {
            Ok(closed) => closed,
            Err(e) => {
                EXEC_REJECTED.inc();
                warn!(exec_id = %exec.fill.execution_id, err = %e, "execution rejected");
                return Err(e);
            }
        };

        let symbol = agg.security().symbol.as_str();
        POSITION_QTY.with_label_values(&[symbol, provider]).set(agg.position());
        OPEN_TRADES.with_label_values(&[symbol, provider]).set(agg.open_trades().len() as i64);
        for t in &closed {
            TRADES_CLOSED.with_label_values(&[symbol]).inc();
            REALIZED_PNL.with_label_values(&[symbol]).add(t.realized_pnl());
            self.sink.persist_trade(t);
        }
        Ok(closed.len())
    }

    #[cfg(test)]
    pub fn get(&self, security: &Security, provider: &str) -> Option<&TradeAggregator> {
        self.aggregators.get(&(security.clone(), provider.to_string()))
    }

    pub fn len(&self) -> usize { self.aggregators.len() }

    /// Sorted by symbol, exchange, provider.
    pub fn snapshots(&self) -> Vec<PositionSnapshot> {
        let mut out: Vec<PositionSnapshot> = self.aggregators.values().map(|a| a.snapshot()).collect();
        out.sort_by(|a, b| {
            (&a.security.symbol, &a.security.exchange, &a.provider)
                .cmp(&(&b.security.symbol, &b.security.exchange, &b.provider))
        });
        out
    }
}

/// Dispatch task. Sole owner of the registry, so every aggregator sees its
/// executions one at a time and in channel order.
pub async fn run(
    mut exec_rx: mpsc::Receiver<Execution>,
    mut registry: TradeRegistry,
    snap_tx: watch::Sender<Vec<PositionSnapshot>>,
    rec_tx: mpsc::Sender<Event>,
) {
    while let Some(exec) = exec_rx.recv().await {
        let _ = rec_tx.try_send(Event::Exec(exec.clone()));
        // rejection already logged by the registry
        if registry.on_execution(&exec).is_ok() {
            let _ = snap_tx.send(registry.snapshots());
        }
    }
    info!(aggregators = registry.len(), "execution stream closed");
}
