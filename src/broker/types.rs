//! Type definitions for broker-side state: instruments, holdings, orders.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Security type of a tradable instrument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SecurityType {
    #[serde(rename = "STK")]
    Stock,
    #[serde(rename = "CASH")]
    Forex,
    #[serde(rename = "FUT")]
    Future,
    #[serde(rename = "OPT")]
    Option,
    #[serde(rename = "IND")]
    Index,
    /// Catch-all for contracts addressed purely by broker id.
    #[serde(rename = "CONTRACT")]
    Generic,
}

impl SecurityType {
    /// Broker wire code (IB-style).
    pub fn code(&self) -> &'static str {
        match self {
            SecurityType::Stock => "STK",
            SecurityType::Forex => "CASH",
            SecurityType::Future => "FUT",
            SecurityType::Option => "OPT",
            SecurityType::Index => "IND",
            SecurityType::Generic => "CONTRACT",
        }
    }
}

impl fmt::Display for SecurityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// A tradable instrument and its identity.
///
/// `contract_id` is the broker-assigned unique id; it is `None` until the
/// contract has been qualified against the gateway. Once qualified an
/// instrument is immutable.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Instrument {
    #[serde(rename = "conId", default, skip_serializing_if = "Option::is_none")]
    pub contract_id: Option<i64>,
    pub symbol: String,
    #[serde(rename = "secType")]
    pub security_type: SecurityType,
    pub exchange: String,
    pub currency: String,
    /// Display name assigned by the broker (e.g., futures local code).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_symbol: Option<String>,
    /// Contract multiplier; `None` means 1 (stocks, forex).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub multiplier: Option<Decimal>,
}

impl Instrument {
    /// Convenience constructor for an exchange-listed stock.
    pub fn stock(symbol: &str, exchange: &str, currency: &str) -> Self {
        Self {
            contract_id: None,
            symbol: symbol.to_string(),
            security_type: SecurityType::Stock,
            exchange: exchange.to_string(),
            currency: currency.to_string(),
            local_symbol: None,
            multiplier: None,
        }
    }

    /// Identity key. Prefers the broker-assigned contract id; falls back to
    /// the composite `(symbol, type, exchange, currency)` key when the
    /// instrument has not been qualified yet.
    pub fn key(&self) -> InstrumentKey {
        match self.contract_id {
            Some(id) => InstrumentKey::Contract(id),
            None => InstrumentKey::Composite(self.composite()),
        }
    }

    /// Composite identity string, independent of qualification.
    pub fn composite(&self) -> String {
        format!(
            "{}/{}/{}/{}",
            self.symbol, self.security_type, self.exchange, self.currency
        )
    }

    /// Name used in logs and execution records.
    pub fn display_name(&self) -> &str {
        self.local_symbol.as_deref().unwrap_or(&self.symbol)
    }

    /// Effective contract multiplier.
    pub fn effective_multiplier(&self) -> Decimal {
        self.multiplier.unwrap_or(Decimal::ONE)
    }
}

/// Stable identity key for netting and aggregation maps.
///
/// Ordering is derived, so `BTreeMap<InstrumentKey, _>` iterates
/// deterministically: qualified contracts first (by id), then unqualified
/// composites (lexicographic).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum InstrumentKey {
    Contract(i64),
    Composite(String),
}

impl fmt::Display for InstrumentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InstrumentKey::Contract(id) => write!(f, "conId:{id}"),
            InstrumentKey::Composite(c) => f.write_str(c),
        }
    }
}

/// Per-run cache of qualified contract ids.
///
/// Lets an unqualified intent instrument net against a broker holding that
/// carries the contract id for the same composite identity.
#[derive(Debug, Default)]
pub struct InstrumentCatalog {
    by_composite: HashMap<String, i64>,
}

impl InstrumentCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remember the contract id of a qualified instrument.
    pub fn learn(&mut self, instrument: &Instrument) {
        if let Some(id) = instrument.contract_id {
            self.by_composite.insert(instrument.composite(), id);
        }
    }

    /// Look up a previously learned contract id by composite identity.
    pub fn contract_id(&self, instrument: &Instrument) -> Option<i64> {
        instrument
            .contract_id
            .or_else(|| self.by_composite.get(&instrument.composite()).copied())
    }

    /// Resolve the identity key, upgrading composites to contract ids the
    /// catalog has already seen this run.
    pub fn resolve(&self, instrument: &Instrument) -> InstrumentKey {
        match self.contract_id(instrument) {
            Some(id) => InstrumentKey::Contract(id),
            None => InstrumentKey::Composite(instrument.composite()),
        }
    }
}

/// Current broker-confirmed position for one instrument.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Holding {
    #[serde(rename = "contract")]
    pub instrument: Instrument,
    /// Signed position; positive = long.
    pub quantity: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub average_cost: Option<Decimal>,
}

/// Order side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderAction {
    Buy,
    Sell,
}

impl OrderAction {
    pub fn opposite(&self) -> Self {
        match self {
            OrderAction::Buy => OrderAction::Sell,
            OrderAction::Sell => OrderAction::Buy,
        }
    }
}

impl fmt::Display for OrderAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderAction::Buy => f.write_str("BUY"),
            OrderAction::Sell => f.write_str("SELL"),
        }
    }
}

/// Order type submitted to the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderKind {
    #[serde(rename = "MKT")]
    Market,
    #[serde(rename = "LMT")]
    Limit,
}

/// Broker order lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    PendingSubmit,
    PreSubmitted,
    Submitted,
    Filled,
    Cancelled,
    Inactive,
    Rejected,
}

impl OrderStatus {
    /// Whether the order still occupies broker-side quantity.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            OrderStatus::PendingSubmit | OrderStatus::PreSubmitted | OrderStatus::Submitted
        )
    }
}

/// An order accepted by the broker but not yet fully filled.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenOrder {
    #[serde(rename = "contract")]
    pub instrument: Instrument,
    pub order_id: i64,
    pub action: OrderAction,
    /// Unfilled quantity, never negative.
    pub remaining_quantity: i64,
    pub status: OrderStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit_price: Option<Decimal>,
}

impl OpenOrder {
    /// Signed in-flight contribution: `+remaining` for BUY, `-remaining`
    /// for SELL. Zero-remaining orders contribute nothing.
    pub fn signed_remaining(&self) -> i64 {
        if self.remaining_quantity <= 0 {
            return 0;
        }
        match self.action {
            OrderAction::Buy => self.remaining_quantity,
            OrderAction::Sell => -self.remaining_quantity,
        }
    }
}

/// New order request handed to the broker.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderTicket {
    #[serde(rename = "contract")]
    pub instrument: Instrument,
    pub action: OrderAction,
    pub quantity: i64,
    pub kind: OrderKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit_price: Option<Decimal>,
    /// Good-till-cancelled by default; the allocator re-nets in-flight
    /// quantity on every run, so resting orders are safe.
    pub tif: TimeInForce,
}

/// Time in force for submitted orders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TimeInForce {
    Gtc,
    Day,
}

/// Broker acknowledgement for a submitted order.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlacedOrder {
    pub order_id: i64,
    #[serde(rename = "contract")]
    pub instrument: Instrument,
    pub action: OrderAction,
    pub quantity: i64,
    pub status: OrderStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit_price: Option<Decimal>,
}

/// One tagged account value reported by the broker.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountValue {
    pub tag: String,
    pub currency: String,
    #[serde(with = "rust_decimal::serde::str")]
    pub value: Decimal,
}
