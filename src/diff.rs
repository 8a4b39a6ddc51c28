// src/diff.rs
//! Level-by-level CDC differ.
//!
//! Compares the prior and new ladder of one side and appends events in the
//! contractual order: Removed first (prior-order), then Added (new-order),
//! then Modified (new-order). Within each pass the side's natural order is
//! used, highest price first for bids and lowest first for asks. Tests rely
//! on this ordering.

use serde::Serialize;

use crate::book::{Ladder, Level, Side};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum CdcKind {
    Added,
    Modified,
    Removed,
    /// Reserved for future use; the engine never emits it.
    BookCleared,
}

impl CdcKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CdcKind::Added => "level_added",
            CdcKind::Modified => "level_modified",
            CdcKind::Removed => "level_removed",
            CdcKind::BookCleared => "book_cleared",
        }
    }
}

/// One price-level change relative to the prior snapshot of the same symbol.
/// Emitted synchronously during `Book::apply`; never persisted.
#[derive(Clone, Debug, Serialize)]
pub struct CdcEvent {
    pub symbol: String,
    pub side: Side,
    pub kind: CdcKind,
    pub level: Level,
    pub seq: u64,
    pub ts_us: u64,
}

/// Diff one side and append events to `out`.
pub fn diff_side(
    symbol: &str,
    side: Side,
    prior: &Ladder,
    new: &Ladder,
    seq: u64,
    ts_us: u64,
    out: &mut Vec<CdcEvent>,
) {
    let event = |kind: CdcKind, level: &Level| CdcEvent {
        symbol: symbol.to_string(),
        side,
        kind,
        level: level.clone(),
        seq,
        ts_us,
    };

    // Three passes keep the emission order independent of how the two maps
    // interleave. `natural` materializes the iteration direction per side.
    for level in natural(prior, side) {
        if !new.contains_key(&level.price) {
            out.push(event(CdcKind::Removed, level));
        }
    }
    for level in natural(new, side) {
        if !prior.contains_key(&level.price) {
            out.push(event(CdcKind::Added, level));
        }
    }
    for level in natural(new, side) {
        if let Some(old) = prior.get(&level.price) {
            if !old.numeric_eq(level) {
                out.push(event(CdcKind::Modified, level));
            }
        }
    }
}

fn natural<'a>(ladder: &'a Ladder, side: Side) -> Box<dyn Iterator<Item = &'a Level> + 'a> {
    match side {
        Side::Bid => Box::new(ladder.values().rev()),
        Side::Ask => Box::new(ladder.values()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn level(price: u64, quantity: u64, num_orders: u32) -> Level {
        Level {
            price,
            quantity,
            num_orders,
            exchanges: Vec::new(),
        }
    }

    fn ladder(levels: &[(u64, u64, u32)]) -> Ladder {
        levels
            .iter()
            .map(|&(p, q, n)| (p, level(p, q, n)))
            .collect()
    }

    #[test]
    fn modified_level_emits_new_state() {
        let prior = ladder(&[(1502500, 1000, 2), (1502400, 500, 1)]);
        let new = ladder(&[(1502500, 700, 1), (1502400, 500, 1)]);

        let mut out = Vec::new();
        diff_side("AAPL", Side::Bid, &prior, &new, 2, 99, &mut out);

        assert_eq!(out.len(), 1);
        assert_eq!(out[0].kind, CdcKind::Modified);
        assert_eq!(out[0].level.price, 1502500);
        assert_eq!(out[0].level.quantity, 700);
        assert_eq!(out[0].level.num_orders, 1);
        assert_eq!(out[0].seq, 2);
        assert_eq!(out[0].ts_us, 99);
    }

    #[test]
    fn removed_before_added() {
        let prior = ladder(&[(1502500, 1000, 2), (1502400, 500, 1)]);
        let new = ladder(&[(1502500, 1000, 2), (1502600, 300, 1)]);

        let mut out = Vec::new();
        diff_side("AAPL", Side::Bid, &prior, &new, 3, 1, &mut out);

        let kinds: Vec<(CdcKind, u64)> = out.iter().map(|e| (e.kind, e.level.price)).collect();
        assert_eq!(
            kinds,
            vec![(CdcKind::Removed, 1502400), (CdcKind::Added, 1502600)]
        );
    }

    #[test]
    fn emission_follows_natural_order_per_side() {
        let prior = ladder(&[]);
        let new = ladder(&[(101, 1, 1), (103, 1, 1), (102, 1, 1)]);

        let mut bids = Vec::new();
        diff_side("X", Side::Bid, &prior, &new, 1, 1, &mut bids);
        let bid_prices: Vec<u64> = bids.iter().map(|e| e.level.price).collect();
        assert_eq!(bid_prices, vec![103, 102, 101]);

        let mut asks = Vec::new();
        diff_side("X", Side::Ask, &prior, &new, 1, 1, &mut asks);
        let ask_prices: Vec<u64> = asks.iter().map(|e| e.level.price).collect();
        assert_eq!(ask_prices, vec![101, 102, 103]);
    }

    #[test]
    fn exchange_only_changes_are_silent() {
        let prior = ladder(&[(100, 10, 1)]);
        let mut new = ladder(&[(100, 10, 1)]);
        new.get_mut(&100).unwrap().exchanges = vec!["NYS".to_string()];

        let mut out = Vec::new();
        diff_side("X", Side::Bid, &prior, &new, 2, 1, &mut out);
        assert!(out.is_empty());
    }

    #[test]
    fn partition_covers_both_key_sets() {
        // Invariant: prior keys = removed + unchanged + modified,
        //            new keys   = added + unchanged + modified.
        let prior = ladder(&[(1, 1, 1), (2, 2, 1), (3, 3, 1), (4, 4, 1)]);
        let new = ladder(&[(2, 2, 1), (3, 30, 1), (5, 5, 1)]);

        let mut out = Vec::new();
        diff_side("X", Side::Ask, &prior, &new, 2, 1, &mut out);

        let removed: Vec<u64> = out
            .iter()
            .filter(|e| e.kind == CdcKind::Removed)
            .map(|e| e.level.price)
            .collect();
        let added: Vec<u64> = out
            .iter()
            .filter(|e| e.kind == CdcKind::Added)
            .map(|e| e.level.price)
            .collect();
        let modified: Vec<u64> = out
            .iter()
            .filter(|e| e.kind == CdcKind::Modified)
            .map(|e| e.level.price)
            .collect();

        assert_eq!(removed, vec![1, 4]);
        assert_eq!(added, vec![5]);
        assert_eq!(modified, vec![3]);
        // 2 is unchanged and emits nothing.
        assert_eq!(out.len(), 4);
    }
}
