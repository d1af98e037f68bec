// ===============================
// src/domain.rs
// ===============================
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Direction of an aggregated trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side { Buy, Sell }
impl Side {
    pub fn sign(&self) -> i64 { match self { Side::Buy => 1, Side::Sell => -1 } }
    /// Side of a non-zero signed quantity.
    pub fn of(qty: i64) -> Side { if qty < 0 { Side::Sell } else { Side::Buy } }
}

/// Side string as reported on a fill.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ExecSide { Buy, Sell, Short, Cover }

impl ExecSide {
    /// SELL and SHORT reduce the position, BUY and COVER add to it.
    pub fn sign(&self) -> i64 {
        match self {
            ExecSide::Sell | ExecSide::Short => -1,
            ExecSide::Buy | ExecSide::Cover => 1,
        }
    }
    pub fn trade_side(&self) -> Side { Side::of(self.sign()) }
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecSide::Buy => "BUY",
            ExecSide::Sell => "SELL",
            ExecSide::Short => "SHORT",
            ExecSide::Cover => "COVER",
        }
    }
}

impl FromStr for ExecSide {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "BUY" => Ok(ExecSide::Buy),
            "SELL" => Ok(ExecSide::Sell),
            "SHORT" => Ok(ExecSide::Short),
            "COVER" => Ok(ExecSide::Cover),
            _ => Err(s.to_string()),
        }
    }
}

impl fmt::Display for ExecSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

/// Instrument identity: equal when symbol and exchange match.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Security { pub symbol: String, pub exchange: String }
impl Security {
    pub fn new(symbol: impl Into<String>, exchange: impl Into<String>) -> Self {
        Self { symbol: symbol.into(), exchange: exchange.into() }
    }
}
impl fmt::Display for Security {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{}@{}", self.symbol, self.exchange) }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order { pub order_id: String, pub side: ExecSide, pub security: Security, pub provider: String }
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fill { pub execution_id: String, pub side: ExecSide, pub qty: i64, pub px: i64, pub ts_ns: i128 }
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Execution { pub order: Order, pub fill: Fill }

impl Execution {
    /// Positive for BUY/COVER, negative for SELL/SHORT.
    pub fn signed_qty(&self) -> i64 { self.fill.side.sign() * self.fill.qty }
}

/// Keep-alive record exchanged between peers. Interval in milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Heartbeat { pub application_id: String, pub heartbeat_interval_ms: u64, pub reply_to: String }
impl Heartbeat {
    pub fn interval(&self) -> Duration { Duration::from_millis(self.heartbeat_interval_ms) }
}

/// One fill applied to a trade (opening or closing).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeFill { pub execution_id: String, pub qty: i64, pub px: i64, pub ts_ns: i128 }

/// What the heartbeat monitor hands to the transport publisher.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum OutboundEvent { Response(Heartbeat), ApplicationDisconnect(String) }

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    HeartbeatIn(Heartbeat),
    Outbound(OutboundEvent),
    Exec(Execution),
    Trade(crate::trades::Trade),
    Note(String),
}

pub fn now_ns() -> i128 {
    chrono::Utc::now().timestamp_nanos_opt().unwrap_or(0) as i128
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exec_side_signs() {
        assert_eq!(ExecSide::Buy.sign(), 1);
        assert_eq!(ExecSide::Cover.sign(), 1);
        assert_eq!(ExecSide::Sell.sign(), -1);
        assert_eq!(ExecSide::Short.sign(), -1);
        assert_eq!(ExecSide::Short.trade_side(), Side::Sell);
        assert_eq!(ExecSide::Cover.trade_side(), Side::Buy);
    }

    #[test]
    fn exec_side_parses_case_insensitive() {
        assert_eq!("short".parse::<ExecSide>(), Ok(ExecSide::Short));
        assert_eq!(" COVER ".parse::<ExecSide>(), Ok(ExecSide::Cover));
        assert!("HOLD".parse::<ExecSide>().is_err());
    }

    #[test]
    fn security_equality_by_symbol_and_exchange() {
        assert_eq!(Security::new("ES", "CME"), Security::new("ES", "CME"));
        assert_ne!(Security::new("ES", "CME"), Security::new("ES", "CBOT"));
    }
}
