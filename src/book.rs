// src/book.rs
//! Per-symbol book state.
//!
//! The engine is snapshot-authoritative: the upstream feed delivers the full
//! two-sided book on every message, so `apply` rebuilds both ladders
//! wholesale instead of patching deltas. Reconstruction logic would only add
//! drift risk.
//!
//! Ladders are `BTreeMap` keyed by scaled integer price. Asks iterate in
//! natural (ascending) order; bids reuse the ascending map and iterate in
//! reverse, so best-first walks are O(depth) on both sides.
//!
//! ## Sequence discipline
//!
//! `last_seq` is monotonic non-decreasing per symbol. A snapshot with the
//! same sequence as the last applied one is a duplicate and drops silently;
//! a lower sequence is a `StaleSequence` error the shard counts and drops.

use serde::Serialize;
use std::collections::BTreeMap;

use crate::diff;
use crate::envelope::{LevelIter, SnapshotView};
use crate::error::ApplyError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum Side {
    Bid,
    Ask,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Bid => "bid",
            Side::Ask => "ask",
        }
    }
}

/// All orders at a single price on a single side, aggregated.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Level {
    pub price: u64,
    pub quantity: u64,
    pub num_orders: u32,
    pub exchanges: Vec<String>,
}

impl Level {
    /// Structural equality on the three numeric fields. The exchanges list
    /// is informational and must not trigger Modified events on its own.
    #[inline]
    pub fn numeric_eq(&self, other: &Level) -> bool {
        self.price == other.price
            && self.quantity == other.quantity
            && self.num_orders == other.num_orders
    }
}

/// Ordered price map for one side. Always stored ascending; bids are read
/// in reverse.
pub type Ladder = BTreeMap<u64, Level>;

/// Outcome of a successful `Book::apply`.
#[derive(Debug)]
pub enum Applied {
    /// Same sequence as the last applied snapshot. State untouched, no CDC,
    /// no render.
    Duplicate,
    /// Ladders replaced; CDC events diffed against the prior state.
    Updated { cdc: Vec<diff::CdcEvent> },
}

#[derive(Debug)]
pub struct Book {
    symbol: String,
    last_seq: u64,
    bids: Ladder,
    asks: Ladder,
    last_trade_price: u64,
    last_trade_qty: u64,
    last_ts_us: u64,
    msg_count: u64,
    initialized: bool,
    max_price_levels: usize,
    enable_cdc: bool,
}

impl Book {
    pub fn new(symbol: impl Into<String>, max_price_levels: usize, enable_cdc: bool) -> Self {
        Self {
            symbol: symbol.into(),
            last_seq: 0,
            bids: Ladder::new(),
            asks: Ladder::new(),
            last_trade_price: 0,
            last_trade_qty: 0,
            last_ts_us: 0,
            msg_count: 0,
            initialized: false,
            max_price_levels,
            enable_cdc,
        }
    }

    /// Apply one decoded snapshot. `now_us` is taken once by the caller and
    /// reused for both the new book state and any emitted CDC events.
    pub fn apply(&mut self, snap: &SnapshotView<'_>, now_us: u64) -> Result<Applied, ApplyError> {
        let sym = snap.symbol();
        if sym.is_empty() {
            return Err(ApplyError::EmptySymbol);
        }
        if sym != self.symbol {
            return Err(ApplyError::SymbolMismatch {
                book: self.symbol.clone(),
                snapshot: sym.to_string(),
            });
        }

        let seq = snap.seq();
        if self.initialized {
            if seq == self.last_seq {
                return Ok(Applied::Duplicate);
            }
            if seq < self.last_seq {
                return Err(ApplyError::StaleSequence {
                    incoming: seq,
                    applied: self.last_seq,
                });
            }
        }

        let new_bids = build_ladder(snap.buy_levels(), Side::Bid, self.max_price_levels);
        let new_asks = build_ladder(snap.sell_levels(), Side::Ask, self.max_price_levels);

        // Bid side first, then ask side; the cross-side order is contractual.
        let mut cdc = Vec::new();
        if self.initialized && self.enable_cdc {
            diff::diff_side(&self.symbol, Side::Bid, &self.bids, &new_bids, seq, now_us, &mut cdc);
            diff::diff_side(&self.symbol, Side::Ask, &self.asks, &new_asks, seq, now_us, &mut cdc);
        }

        self.bids = new_bids;
        self.asks = new_asks;
        self.last_seq = seq;
        self.last_trade_price = snap.recent_trade_price();
        self.last_trade_qty = snap.recent_trade_qty();
        self.last_ts_us = now_us;
        self.msg_count += 1;
        self.initialized = true;

        Ok(Applied::Updated { cdc })
    }

    #[inline]
    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    #[inline]
    pub fn last_seq(&self) -> u64 {
        self.last_seq
    }

    #[inline]
    pub fn msg_count(&self) -> u64 {
        self.msg_count
    }

    #[inline]
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    #[inline]
    pub fn last_ts_us(&self) -> u64 {
        self.last_ts_us
    }

    #[inline]
    pub fn last_trade(&self) -> (u64, u64) {
        (self.last_trade_price, self.last_trade_qty)
    }

    #[inline]
    pub fn bids(&self) -> &Ladder {
        &self.bids
    }

    #[inline]
    pub fn asks(&self) -> &Ladder {
        &self.asks
    }

    #[inline]
    pub fn depth(&self, side: Side) -> usize {
        match side {
            Side::Bid => self.bids.len(),
            Side::Ask => self.asks.len(),
        }
    }

    /// Top `n` levels in the side's natural order: bids highest price first,
    /// asks lowest price first.
    pub fn top_levels(&self, side: Side, n: usize) -> Vec<&Level> {
        match side {
            Side::Bid => self.bids.values().rev().take(n).collect(),
            Side::Ask => self.asks.values().take(n).collect(),
        }
    }
}

fn build_ladder(levels: LevelIter<'_>, side: Side, cap: usize) -> Ladder {
    let mut ladder = Ladder::new();

    for lv in levels {
        if lv.price() == 0 {
            continue;
        }

        let mut quantity = 0u64;
        let mut num_orders = 0u32;
        for o in lv.orders() {
            if o.qty > 0 {
                quantity = quantity.saturating_add(o.qty);
                num_orders += 1;
            }
        }
        if quantity == 0 {
            continue;
        }

        // Duplicate prices within one snapshot merge rather than error.
        ladder
            .entry(lv.price())
            .and_modify(|l| {
                l.quantity = l.quantity.saturating_add(quantity);
                l.num_orders += num_orders;
            })
            .or_insert(Level {
                price: lv.price(),
                quantity,
                num_orders,
                exchanges: Vec::new(),
            });
    }

    // Surplus beyond the cap is discarded from the worst end, keeping the
    // best `cap` levels on each side.
    while ladder.len() > cap {
        match side {
            Side::Bid => ladder.pop_first(),
            Side::Ask => ladder.pop_last(),
        };
    }

    ladder
}

impl Book {
    pub fn assert_invariants(&self) {
        for ladder in [&self.bids, &self.asks] {
            for (px, level) in ladder {
                assert_eq!(*px, level.price, "ladder key/level price mismatch");
                assert!(level.price > 0, "zero price stored");
                assert!(level.quantity > 0, "zero quantity stored");
                assert!(level.num_orders >= 1, "empty level stored");
            }
        }
        assert!(self.bids.len() <= self.max_price_levels, "bid cap exceeded");
        assert!(self.asks.len() <= self.max_price_levels, "ask cap exceeded");
    }
}
