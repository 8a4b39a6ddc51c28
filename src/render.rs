// src/render.rs
//! Multi-depth JSON rendering.
//!
//! Field names are contract with downstream consumers; see the snapshot and
//! CDC schemas in the tests. Prices and quantities are rendered as
//! fixed-point strings so that parsing the string and rescaling returns the
//! stored integer exactly.

use serde_json::{json, Map, Value};

use crate::book::{Book, Level, Side};
use crate::config::JsonConfig;
use crate::diff::CdcEvent;

/// Fixed-point rendering of a scaled integer with `decimals` digits after
/// the point.
pub fn format_scaled(value: u64, decimals: u32) -> String {
    let mut buf = itoa::Buffer::new();
    if decimals == 0 {
        return buf.format(value).to_string();
    }

    let pow = 10u64.pow(decimals);
    let mut out = String::with_capacity(24);
    out.push_str(buf.format(value / pow));
    out.push('.');
    let frac = buf.format(value % pow);
    for _ in frac.len()..decimals as usize {
        out.push('0');
    }
    out.push_str(frac);
    out
}

/// Signed variant for spreads, which go negative on a crossed book.
pub fn format_scaled_signed(value: i64, decimals: u32) -> String {
    if value < 0 {
        let mut out = String::with_capacity(25);
        out.push('-');
        out.push_str(&format_scaled(value.unsigned_abs(), decimals));
        out
    } else {
        format_scaled(value as u64, decimals)
    }
}

/// ISO-8601 UTC with millisecond precision, derived by integer division of
/// the microsecond timestamp.
pub fn iso_timestamp(ts_us: u64) -> String {
    let ms = (ts_us / 1_000) as i64;
    chrono::DateTime::<chrono::Utc>::from_timestamp_millis(ms)
        .unwrap_or_default()
        .format("%Y-%m-%dT%H:%M:%S%.3fZ")
        .to_string()
}

pub struct Renderer {
    cfg: JsonConfig,
}

impl Renderer {
    pub fn new(cfg: JsonConfig) -> Self {
        Self { cfg }
    }

    #[inline]
    fn format_price(&self, v: u64) -> String {
        format_scaled(v, self.cfg.price_decimals)
    }

    #[inline]
    fn format_qty(&self, v: u64) -> String {
        format_scaled(v, self.cfg.quantity_decimals)
    }

    fn dump(&self, value: &Value) -> String {
        if self.cfg.compact_format {
            value.to_string()
        } else {
            serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
        }
    }

    fn common_fields(&self, j: &mut Map<String, Value>, symbol: &str, seq: u64, ts_us: u64) {
        j.insert("symbol".into(), json!(symbol));
        if self.cfg.include_sequence {
            j.insert("sequence".into(), json!(seq));
        }
        if self.cfg.include_timestamp {
            j.insert("timestamp".into(), json!(ts_us));
            j.insert("timestamp_iso".into(), json!(iso_timestamp(ts_us)));
        }
    }

    fn level_obj(&self, level: &Level, side: Side, symbol: &str) -> Value {
        let exchanges: Vec<&str> = if level.exchanges.is_empty() {
            vec![self.cfg.exchange_name.as_str()]
        } else {
            level.exchanges.iter().map(String::as_str).collect()
        };

        json!({
            "symbol": symbol,
            "side": side.as_str(),
            "price": self.format_price(level.price),
            "quantity": self.format_qty(level.quantity),
            "number_of_orders": level.num_orders,
            "exchanges": exchanges,
        })
    }

    /// Render one depth view. The caller guarantees both ladders hold at
    /// least `depth` levels.
    pub fn snapshot_json(&self, book: &Book, depth: u32) -> String {
        let mut j = Map::new();
        self.common_fields(&mut j, book.symbol(), book.last_seq(), book.last_ts_us());
        j.insert("message_type".into(), json!("snapshot"));
        j.insert("depth".into(), json!(depth));

        let top_bids = book.top_levels(Side::Bid, depth as usize);
        let top_asks = book.top_levels(Side::Ask, depth as usize);

        j.insert(
            "bids".into(),
            Value::Array(
                top_bids
                    .iter()
                    .map(|l| self.level_obj(l, Side::Bid, book.symbol()))
                    .collect(),
            ),
        );
        j.insert(
            "asks".into(),
            Value::Array(
                top_asks
                    .iter()
                    .map(|l| self.level_obj(l, Side::Ask, book.symbol()))
                    .collect(),
            ),
        );

        let (trade_price, trade_qty) = book.last_trade();
        if trade_price > 0 {
            j.insert(
                "last_trade".into(),
                json!({
                    "price": self.format_price(trade_price),
                    "quantity": self.format_qty(trade_qty),
                }),
            );
        }

        let mut stats = Map::new();
        stats.insert("total_bid_levels".into(), json!(book.depth(Side::Bid)));
        stats.insert("total_ask_levels".into(), json!(book.depth(Side::Ask)));
        stats.insert(
            "has_sufficient_depth".into(),
            json!(
                book.depth(Side::Bid) >= depth as usize
                    && book.depth(Side::Ask) >= depth as usize
            ),
        );
        if let (Some(bid), Some(ask)) = (top_bids.first(), top_asks.first()) {
            let spread = ask.price as i64 - bid.price as i64;
            stats.insert(
                "spread".into(),
                json!(format_scaled_signed(spread, self.cfg.price_decimals)),
            );
            // Mid rounds down on odd sums: integer division by 2.
            let mid = (bid.price + ask.price) / 2;
            stats.insert("mid_price".into(), json!(self.format_price(mid)));
        }
        j.insert("market_stats".into(), Value::Object(stats));

        self.dump(&Value::Object(j))
    }

    /// Render every configured depth, ascending, skipping depths either side
    /// cannot fill. Returns `(depth, payload)` pairs.
    pub fn render_depths(&self, book: &Book, depths: &[u32]) -> Vec<(u32, String)> {
        let mut out = Vec::with_capacity(depths.len());
        for &depth in depths {
            if book.depth(Side::Bid) >= depth as usize && book.depth(Side::Ask) >= depth as usize {
                out.push((depth, self.snapshot_json(book, depth)));
            }
        }
        out
    }

    pub fn cdc_json(&self, event: &CdcEvent) -> String {
        let mut j = Map::new();
        self.common_fields(&mut j, &event.symbol, event.seq, event.ts_us);
        j.insert("message_type".into(), json!("cdc"));
        j.insert("event_type".into(), json!(event.kind.as_str()));
        j.insert("side".into(), json!(event.side.as_str()));
        j.insert(
            "level".into(),
            self.level_obj(&event.level, event.side, &event.symbol),
        );
        self.dump(&Value::Object(j))
    }
}
