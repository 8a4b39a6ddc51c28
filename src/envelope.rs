// src/envelope.rs
//! Binary envelope decoding.
//!
//! The feed wraps every message in a little-endian, magic-prefixed envelope:
//!
//! ```text
//! magic      [4]  = b"MDE1"
//! msg_type   u8   (1 = snapshot, 2 = heartbeat, 3 = stats)
//! symbol_len u16, symbol utf-8 bytes
//! seq        u64
//! recent_trade_price u64
//! recent_trade_qty   u64
//! buy_count  u16, sell_count u16
//! levels     buy side then sell side, each:
//!   price       u64
//!   order_count u16
//!   orders      order_count x { id u64, qty u64, side u8 }
//! ```
//!
//! The side ordering of the level lists is unspecified by the envelope and
//! must not be trusted; the book re-sorts on apply.
//!
//! [`decode`] performs a single validation walk over the payload and returns
//! a borrowed [`SnapshotView`]. The view never allocates the level set; it
//! exposes iterators over levels and their orders so the book can aggregate
//! in one pass.

use bytes::Bytes;

use crate::error::DecodeError;

pub const MAGIC: [u8; 4] = *b"MDE1";

pub const MSG_SNAPSHOT: u8 = 1;
pub const MSG_HEARTBEAT: u8 = 2;
pub const MSG_STATS: u8 = 3;

const HEADER_FIXED: usize = 4 + 1 + 2;
const SNAPSHOT_FIXED: usize = 8 + 8 + 8 + 2 + 2;
const LEVEL_FIXED: usize = 8 + 2;
const ORDER_SIZE: usize = 8 + 8 + 1;

/// A decoded envelope borrowing the payload bytes.
#[derive(Debug)]
pub enum Envelope<'a> {
    Snapshot(SnapshotView<'a>),
    /// Non-snapshot message types are not errors; the pipeline drops them
    /// with a debug trace.
    Other(OtherKind),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OtherKind {
    Heartbeat,
    Stats,
}

/// Borrowed view over a snapshot envelope.
#[derive(Debug, Clone, Copy)]
pub struct SnapshotView<'a> {
    buf: &'a [u8],
    symbol: &'a str,
    seq: u64,
    trade_price: u64,
    trade_qty: u64,
    buy_count: u16,
    sell_count: u16,
    buy_off: usize,
    sell_off: usize,
}

impl<'a> SnapshotView<'a> {
    #[inline]
    pub fn symbol(&self) -> &'a str {
        self.symbol
    }

    #[inline]
    pub fn seq(&self) -> u64 {
        self.seq
    }

    #[inline]
    pub fn recent_trade_price(&self) -> u64 {
        self.trade_price
    }

    #[inline]
    pub fn recent_trade_qty(&self) -> u64 {
        self.trade_qty
    }

    /// Iterate the buy-side levels in wire order.
    #[inline]
    pub fn buy_levels(&self) -> LevelIter<'a> {
        LevelIter {
            buf: self.buf,
            off: self.buy_off,
            remaining: self.buy_count,
        }
    }

    /// Iterate the sell-side levels in wire order.
    #[inline]
    pub fn sell_levels(&self) -> LevelIter<'a> {
        LevelIter {
            buf: self.buf,
            off: self.sell_off,
            remaining: self.sell_count,
        }
    }
}

/// Iterator over the levels of one side. The payload was validated during
/// [`decode`], so the walk here is unchecked beyond slice bounds.
pub struct LevelIter<'a> {
    buf: &'a [u8],
    off: usize,
    remaining: u16,
}

impl<'a> Iterator for LevelIter<'a> {
    type Item = LevelView<'a>;

    fn next(&mut self) -> Option<LevelView<'a>> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;

        let price = read_u64(self.buf, self.off);
        let count = read_u16(self.buf, self.off + 8);
        let orders_off = self.off + LEVEL_FIXED;
        let orders_len = count as usize * ORDER_SIZE;
        self.off = orders_off + orders_len;

        Some(LevelView {
            price,
            orders: &self.buf[orders_off..orders_off + orders_len],
            count,
        })
    }
}

/// One price entry and its order list.
#[derive(Debug, Clone, Copy)]
pub struct LevelView<'a> {
    price: u64,
    orders: &'a [u8],
    count: u16,
}

impl<'a> LevelView<'a> {
    #[inline]
    pub fn price(&self) -> u64 {
        self.price
    }

    #[inline]
    pub fn order_count(&self) -> u16 {
        self.count
    }

    #[inline]
    pub fn orders(&self) -> OrderIter<'a> {
        OrderIter {
            buf: self.orders,
            off: 0,
        }
    }
}

/// A single order inside a level. Exists only inside a decoded level; never
/// stored across snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderRef {
    pub id: u64,
    pub qty: u64,
    pub side: u8,
}

pub struct OrderIter<'a> {
    buf: &'a [u8],
    off: usize,
}

impl Iterator for OrderIter<'_> {
    type Item = OrderRef;

    #[inline]
    fn next(&mut self) -> Option<OrderRef> {
        if self.off >= self.buf.len() {
            return None;
        }
        let o = OrderRef {
            id: read_u64(self.buf, self.off),
            qty: read_u64(self.buf, self.off + 8),
            side: self.buf[self.off + 16],
        };
        self.off += ORDER_SIZE;
        Some(o)
    }
}

/// Decode an envelope payload. Stateless.
pub fn decode(payload: &[u8]) -> Result<Envelope<'_>, DecodeError> {
    if payload.len() < HEADER_FIXED || payload[..4] != MAGIC {
        return Err(DecodeError::TruncatedHeader);
    }

    match payload[4] {
        MSG_SNAPSHOT => {}
        MSG_HEARTBEAT => return Ok(Envelope::Other(OtherKind::Heartbeat)),
        MSG_STATS => return Ok(Envelope::Other(OtherKind::Stats)),
        other => return Err(DecodeError::UnknownMessageType(other)),
    }

    let symbol_len = read_u16(payload, 5) as usize;
    if symbol_len == 0 {
        return Err(DecodeError::MissingSymbol);
    }
    let symbol_end = HEADER_FIXED + symbol_len;
    if payload.len() < symbol_end + SNAPSHOT_FIXED {
        return Err(DecodeError::TruncatedHeader);
    }
    let symbol = std::str::from_utf8(&payload[HEADER_FIXED..symbol_end])
        .map_err(|_| DecodeError::MissingSymbol)?;

    let seq = read_u64(payload, symbol_end);
    let trade_price = read_u64(payload, symbol_end + 8);
    let trade_qty = read_u64(payload, symbol_end + 16);
    let buy_count = read_u16(payload, symbol_end + 24);
    let sell_count = read_u16(payload, symbol_end + 26);

    // One validation walk; records where the sell side starts so the
    // iterators can re-walk without checks.
    let buy_off = symbol_end + SNAPSHOT_FIXED;
    let sell_off = walk_levels(payload, buy_off, buy_count)?;
    let _end = walk_levels(payload, sell_off, sell_count)?;

    Ok(Envelope::Snapshot(SnapshotView {
        buf: payload,
        symbol,
        seq,
        trade_price,
        trade_qty,
        buy_count,
        sell_count,
        buy_off,
        sell_off,
    }))
}

fn walk_levels(buf: &[u8], mut off: usize, count: u16) -> Result<usize, DecodeError> {
    for _ in 0..count {
        if buf.len() < off + LEVEL_FIXED {
            return Err(DecodeError::MalformedLevel);
        }
        let orders = read_u16(buf, off + 8) as usize;
        off += LEVEL_FIXED + orders * ORDER_SIZE;
        if buf.len() < off {
            return Err(DecodeError::MalformedLevel);
        }
    }
    Ok(off)
}

#[inline(always)]
fn read_u16(buf: &[u8], off: usize) -> u16 {
    u16::from_le_bytes([buf[off], buf[off + 1]])
}

#[inline(always)]
fn read_u64(buf: &[u8], off: usize) -> u64 {
    u64::from_le_bytes(buf[off..off + 8].try_into().unwrap())
}

/// Encode a snapshot envelope. Used by the replay tooling and tests; the
/// live feed produces these frames upstream.
pub fn encode_snapshot(
    symbol: &str,
    seq: u64,
    buys: &[(u64, &[(u64, u64)])],
    sells: &[(u64, &[(u64, u64)])],
    trade_price: u64,
    trade_qty: u64,
) -> Bytes {
    let orders = |side: &[(u64, &[(u64, u64)])]| -> usize {
        side.iter().map(|(_, os)| os.len()).sum()
    };
    let cap = HEADER_FIXED
        + symbol.len()
        + SNAPSHOT_FIXED
        + (buys.len() + sells.len()) * LEVEL_FIXED
        + (orders(buys) + orders(sells)) * ORDER_SIZE;
    let mut out = Vec::with_capacity(cap);

    out.extend_from_slice(&MAGIC);
    out.push(MSG_SNAPSHOT);
    out.extend_from_slice(&(symbol.len() as u16).to_le_bytes());
    out.extend_from_slice(symbol.as_bytes());
    out.extend_from_slice(&seq.to_le_bytes());
    out.extend_from_slice(&trade_price.to_le_bytes());
    out.extend_from_slice(&trade_qty.to_le_bytes());
    out.extend_from_slice(&(buys.len() as u16).to_le_bytes());
    out.extend_from_slice(&(sells.len() as u16).to_le_bytes());

    for (side_byte, levels) in [(0u8, buys), (1u8, sells)] {
        for (price, orders) in levels {
            out.extend_from_slice(&price.to_le_bytes());
            out.extend_from_slice(&(orders.len() as u16).to_le_bytes());
            for (id, qty) in orders.iter() {
                out.extend_from_slice(&id.to_le_bytes());
                out.extend_from_slice(&qty.to_le_bytes());
                out.push(side_byte);
            }
        }
    }

    Bytes::from(out)
}

/// Encode a heartbeat envelope (dropped by the pipeline).
pub fn encode_heartbeat() -> Bytes {
    let mut out = Vec::with_capacity(HEADER_FIXED);
    out.extend_from_slice(&MAGIC);
    out.push(MSG_HEARTBEAT);
    out.extend_from_slice(&0u16.to_le_bytes());
    Bytes::from(out)
}
