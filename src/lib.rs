//! # Market Depth Engine
//!
//! A streaming market-depth engine: consumes Level-2 order-book snapshots
//! from a partitioned feed, maintains per-symbol book state, detects
//! level-by-level changes, and republishes multi-depth JSON snapshots plus
//! change-data-capture (CDC) events.
//!
//! ## Architecture
//!
//! - **Envelope**: zero-allocation decoding of the binary snapshot envelope
//! - **Book**: snapshot-authoritative per-symbol ladders with sequence
//!   discipline
//! - **Differ**: deterministic level-by-level CDC between consecutive
//!   snapshots
//! - **Renderer**: multi-depth JSON views with fixed-point formatting
//! - **Shards**: symbols partitioned by stable hash, one single-writer
//!   worker per shard
//! - **Publisher**: topic/partition routing policy over a pluggable output
//!   sink
//!
//! ## Example
//!
//! ```rust
//! use market_depth_engine::book::{Book, Side};
//! use market_depth_engine::envelope::{decode, encode_snapshot, Envelope};
//!
//! let payload = encode_snapshot(
//!     "AAPL",
//!     1,
//!     &[(1502500, &[(1, 600), (2, 400)])],
//!     &[(1502600, &[(3, 800)])],
//!     0,
//!     0,
//! );
//!
//! let Envelope::Snapshot(view) = decode(&payload).unwrap() else {
//!     unreachable!()
//! };
//!
//! let mut book = Book::new("AAPL", 100, true);
//! book.apply(&view, 0).unwrap();
//! assert_eq!(book.top_levels(Side::Bid, 1)[0].quantity, 1000);
//! ```
pub mod book;
pub mod bus;
pub mod config;
pub mod diff;
pub mod envelope;
pub mod error;
pub mod http;
pub mod metrics;
pub mod pipeline;
pub mod publisher;
pub mod render;
pub mod shard;
