// src/shard.rs
//! Symbol routing and per-shard book ownership.
//!
//! Snapshots for one symbol always land on the same shard, which serialises
//! them; shards are independent and run in parallel. The routing hash is
//! FNV-1a 64-bit: deterministic across restarts and platforms, so shard
//! placement (and output partitioning) is stable for a given symbol.

use hashbrown::HashMap;

use crate::book::{Applied, Book};
use crate::config::{DepthConfig, JsonConfig};
use crate::diff::CdcEvent;
use crate::envelope::SnapshotView;
use crate::error::ApplyError;
use crate::render::Renderer;

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// FNV-1a 64-bit over the symbol bytes.
#[inline]
pub fn stable_hash(symbol: &str) -> u64 {
    let mut h = FNV_OFFSET;
    for &b in symbol.as_bytes() {
        h ^= b as u64;
        h = h.wrapping_mul(FNV_PRIME);
    }
    h
}

#[inline]
pub fn shard_of(symbol: &str, shard_count: usize) -> usize {
    (stable_hash(symbol) % shard_count.max(1) as u64) as usize
}

/// Result of applying one snapshot through a shard.
#[derive(Debug, Default)]
pub struct Outcome {
    /// `(depth, payload)` pairs in ascending depth order.
    pub rendered: Vec<(u32, String)>,
    pub cdc: Vec<CdcEvent>,
    /// false for duplicate sequences: nothing rendered, nothing diffed.
    pub accepted: bool,
    /// Depths skipped because a side had fewer levels. Counter fodder only.
    pub insufficient_depth: u64,
}

/// One partition of the symbol space. Single-writer: exactly one worker
/// drives `apply`; the map is never shared.
pub struct SymbolShard {
    id: usize,
    books: HashMap<String, Book>,
    depth_cfg: DepthConfig,
    depths: Vec<u32>,
    renderer: Renderer,
    messages: u64,
}

#[derive(Debug, Clone, Copy)]
pub struct ShardStats {
    pub id: usize,
    pub symbols: usize,
    pub messages: u64,
}

impl SymbolShard {
    pub fn new(id: usize, depth_cfg: DepthConfig, json_cfg: JsonConfig) -> Self {
        let depths = depth_cfg.sorted_levels();
        Self {
            id,
            books: HashMap::new(),
            depth_cfg,
            depths,
            renderer: Renderer::new(json_cfg),
            messages: 0,
        }
    }

    #[inline]
    pub fn id(&self) -> usize {
        self.id
    }

    /// Apply a decoded snapshot to the owning book, creating it on first
    /// sighting of the symbol.
    pub fn apply(&mut self, snap: &SnapshotView<'_>, now_us: u64) -> Result<Outcome, ApplyError> {
        let symbol = snap.symbol();
        if symbol.is_empty() {
            return Err(ApplyError::EmptySymbol);
        }

        let book = self.books.entry_ref(symbol).or_insert_with(|| {
            Book::new(
                symbol,
                self.depth_cfg.max_price_levels,
                self.depth_cfg.enable_cdc,
            )
        });

        match book.apply(snap, now_us)? {
            Applied::Duplicate => Ok(Outcome {
                accepted: false,
                ..Outcome::default()
            }),
            Applied::Updated { cdc } => {
                self.messages += 1;
                let rendered = if self.depth_cfg.enable_snapshots {
                    self.renderer.render_depths(book, &self.depths)
                } else {
                    Vec::new()
                };
                let insufficient_depth = if self.depth_cfg.enable_snapshots {
                    (self.depths.len() - rendered.len()) as u64
                } else {
                    0
                };
                Ok(Outcome {
                    rendered,
                    cdc,
                    accepted: true,
                    insufficient_depth,
                })
            }
        }
    }

    pub fn stats(&self) -> ShardStats {
        ShardStats {
            id: self.id,
            symbols: self.books.len(),
            messages: self.messages,
        }
    }

    pub fn book(&self, symbol: &str) -> Option<&Book> {
        self.books.get(symbol)
    }

    /// The shard's renderer, reused by the worker for CDC payloads.
    #[inline]
    pub fn renderer(&self) -> &Renderer {
        &self.renderer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::{decode, encode_snapshot, Envelope};
    use bytes::Bytes;

    fn shard(depths: &[u32]) -> SymbolShard {
        let depth_cfg = DepthConfig {
            levels: depths.to_vec(),
            ..DepthConfig::default()
        };
        let json_cfg = JsonConfig {
            compact_format: true,
            ..JsonConfig::default()
        };
        SymbolShard::new(0, depth_cfg, json_cfg)
    }

    fn apply(s: &mut SymbolShard, payload: &Bytes, now_us: u64) -> Result<Outcome, ApplyError> {
        let Envelope::Snapshot(view) = decode(payload).unwrap() else {
            panic!("expected snapshot");
        };
        s.apply(&view, now_us)
    }

    #[test]
    fn routing_is_deterministic() {
        let shards: Vec<usize> = ["AAPL", "MSFT", "GOOG", "AAPL"]
            .iter()
            .map(|s| shard_of(s, 8))
            .collect();
        assert_eq!(shards[0], shards[3]);
        for s in &shards {
            assert!(*s < 8);
        }
    }

    #[test]
    fn stable_hash_is_pinned() {
        // FNV-1a 64 reference values; a change here breaks shard placement
        // across restarts.
        assert_eq!(stable_hash(""), 0xcbf2_9ce4_8422_2325);
        assert_eq!(stable_hash("a"), 0xaf63_dc4c_8601_ec8c);
    }

    #[test]
    fn bring_up_without_render_below_depth() {
        // Two levels per side against configured depth 5: no render, no CDC.
        let mut s = shard(&[5]);
        let payload = encode_snapshot(
            "AAPL",
            1,
            &[(1502500, &[(1, 600), (2, 400)]), (1502400, &[(3, 500)])],
            &[(1502600, &[(4, 800)]), (1502700, &[(5, 200)])],
            0,
            0,
        );

        let out = apply(&mut s, &payload, 1).unwrap();
        assert!(out.accepted);
        assert!(out.cdc.is_empty());
        assert!(out.rendered.is_empty());
        assert_eq!(out.insufficient_depth, 1);
        assert!(s.book("AAPL").unwrap().is_initialized());
        assert_eq!(s.stats().messages, 1);
        assert_eq!(s.stats().symbols, 1);
    }

    #[test]
    fn renders_when_depth_available() {
        let mut s = shard(&[2]);
        let payload = encode_snapshot(
            "AAPL",
            1,
            &[(1502500, &[(1, 600)]), (1502400, &[(2, 500)])],
            &[(1502600, &[(3, 800)]), (1502700, &[(4, 200)])],
            0,
            0,
        );
        let out = apply(&mut s, &payload, 1).unwrap();
        assert_eq!(out.rendered.len(), 1);
        assert_eq!(out.rendered[0].0, 2);
        assert_eq!(out.insufficient_depth, 0);
    }

    #[test]
    fn duplicate_not_accepted_stale_is_error() {
        let mut s = shard(&[1]);
        let s1 = encode_snapshot("X", 1, &[(100, &[(1, 1)])], &[(200, &[(2, 1)])], 0, 0);
        assert!(apply(&mut s, &s1, 1).unwrap().accepted);

        let dup = apply(&mut s, &s1, 2).unwrap();
        assert!(!dup.accepted);
        assert!(dup.rendered.is_empty() && dup.cdc.is_empty());
        assert_eq!(s.stats().messages, 1);

        let s0 = encode_snapshot("X", 0, &[(100, &[(1, 1)])], &[(200, &[(2, 1)])], 0, 0);
        assert!(matches!(
            apply(&mut s, &s0, 3),
            Err(ApplyError::StaleSequence { .. })
        ));
    }

    #[test]
    fn modified_and_add_remove_sequences() {
        let mut s = shard(&[5]);
        let s1 = encode_snapshot(
            "AAPL",
            1,
            &[(1502500, &[(1, 600), (2, 400)]), (1502400, &[(3, 500)])],
            &[(1502600, &[(4, 800)]), (1502700, &[(5, 200)])],
            0,
            0,
        );
        apply(&mut s, &s1, 1).unwrap();

        // seq=2 replaces the two orders at 150.25 with one of 700.
        let s2 = encode_snapshot(
            "AAPL",
            2,
            &[(1502500, &[(9, 700)]), (1502400, &[(3, 500)])],
            &[(1502600, &[(4, 800)]), (1502700, &[(5, 200)])],
            0,
            0,
        );
        let out = apply(&mut s, &s2, 2).unwrap();
        assert_eq!(out.cdc.len(), 1);
        let ev = &out.cdc[0];
        assert_eq!(ev.kind, crate::diff::CdcKind::Modified);
        assert_eq!(ev.level.price, 1502500);
        assert_eq!(ev.level.quantity, 700);
        assert_eq!(ev.level.num_orders, 1);

        // seq=3 drops the bid at 150.24 and adds one at 150.26.
        let s3 = encode_snapshot(
            "AAPL",
            3,
            &[(1502500, &[(9, 700)]), (1502600, &[(10, 100)])],
            &[(1502600, &[(4, 800)]), (1502700, &[(5, 200)])],
            0,
            0,
        );
        let out = apply(&mut s, &s3, 3).unwrap();
        let kinds: Vec<(crate::diff::CdcKind, u64)> =
            out.cdc.iter().map(|e| (e.kind, e.level.price)).collect();
        assert_eq!(
            kinds,
            vec![
                (crate::diff::CdcKind::Removed, 1502400),
                (crate::diff::CdcKind::Added, 1502600),
            ]
        );
    }
}
