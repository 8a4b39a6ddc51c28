// src/pipeline.rs
//! Engine wiring.
//!
//! One blocking input loop decodes and routes payloads to shard workers by
//! stable symbol hash; each shard worker serialises its symbols and forwards
//! publish commands to a single publisher task. A flush ticker nudges the
//! sink periodically and a reporter logs the running stats. Shutdown is a
//! flag checked between messages: workers finish the in-flight message,
//! channels drain in dependency order, and the sink gets one bounded final
//! flush.

use bytes::Bytes;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::bus::{Fetch, InputStream, OutputSink};
use crate::config::Config;
use crate::envelope::{self, Envelope};
use crate::error::ApplyError;
use crate::metrics::Metrics;
use crate::publisher::{Publisher, TopicRouter};
use crate::shard::{shard_of, SymbolShard};

const CHANNEL_DEPTH: usize = 32_768;
const FINAL_FLUSH: Duration = Duration::from_millis(100);

/// Latest rendered snapshot per symbol, shared with the HTTP layer.
pub type LatestSnapshots = Arc<DashMap<String, Bytes>>;

enum PubCmd {
    Snapshot {
        symbol: String,
        depth: u32,
        payload: Bytes,
    },
    Cdc {
        symbol: String,
        payload: Bytes,
    },
}

/// One line per error kind per second; everything else is dropped so a bad
/// feed cannot storm the log.
pub(crate) struct Throttle {
    last: Option<Instant>,
    interval: Duration,
}

impl Throttle {
    pub(crate) fn per_second() -> Self {
        Self {
            last: None,
            interval: Duration::from_secs(1),
        }
    }

    pub(crate) fn allow(&mut self) -> bool {
        let now = Instant::now();
        match self.last {
            Some(t) if now.duration_since(t) < self.interval => false,
            _ => {
                self.last = Some(now);
                true
            }
        }
    }
}

#[inline]
fn epoch_micros() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0)
}

/// Run the engine until the input stream ends or the shutdown flag is set.
pub async fn run(
    cfg: Config,
    source: Box<dyn InputStream>,
    sink: Arc<dyn OutputSink>,
    metrics: Arc<Metrics>,
    shard_count: usize,
    shutdown: Arc<AtomicBool>,
    latest: LatestSnapshots,
) -> anyhow::Result<()> {
    let shard_n = shard_count.max(1);
    info!(
        "engine: shards={shard_n} depths={:?} cdc={} snapshots={}",
        cfg.depth_config.sorted_levels(),
        cfg.depth_config.enable_cdc,
        cfg.depth_config.enable_snapshots,
    );

    let (pub_tx, pub_rx) = mpsc::channel::<PubCmd>(CHANNEL_DEPTH);
    let publisher = Publisher::new(
        TopicRouter::new(cfg.topic_config.clone()),
        sink.clone(),
        metrics.clone(),
    );
    let pub_task = tokio::spawn(publisher_loop(pub_rx, publisher, latest));

    let mut shard_txs = Vec::with_capacity(shard_n);
    let mut shard_tasks = Vec::with_capacity(shard_n);
    for shard_id in 0..shard_n {
        let (tx, rx) = mpsc::channel::<Bytes>(CHANNEL_DEPTH);
        shard_txs.push(tx);
        let shard = SymbolShard::new(shard_id, cfg.depth_config.clone(), cfg.json_config.clone());
        shard_tasks.push(tokio::spawn(shard_loop(
            shard,
            rx,
            pub_tx.clone(),
            metrics.clone(),
        )));
    }
    drop(pub_tx);

    let flush_task = tokio::spawn({
        let sink = sink.clone();
        let metrics = metrics.clone();
        let interval = Duration::from_millis(cfg.processor.flush_interval_ms.max(1));
        async move {
            let mut tick = tokio::time::interval(interval);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            tick.tick().await;
            loop {
                tick.tick().await;
                if sink.flush(FINAL_FLUSH).is_err() {
                    metrics.inc_publish_errors();
                }
            }
        }
    });

    let reporter_task = tokio::spawn({
        let metrics = metrics.clone();
        let interval = Duration::from_secs(cfg.processor.stats_interval_s.max(1));
        async move {
            let mut tick = tokio::time::interval(interval);
            tick.tick().await;
            loop {
                tick.tick().await;
                metrics.log_summary();
            }
        }
    });

    let poll_timeout = Duration::from_millis(cfg.processor.poll_timeout_ms.max(1));
    let input_metrics = metrics.clone();
    let input_shutdown = shutdown.clone();
    let input = tokio::task::spawn_blocking(move || {
        input_loop(source, shard_txs, poll_timeout, input_metrics, input_shutdown)
    });

    // A panicked input loop still drops the shard senders, so the teardown
    // below works either way; never skip it.
    if let Err(e) = input.await {
        error!("input loop panicked: {e}");
    }

    // Release in reverse acquisition order. The shard senders are gone with
    // the input loop, so the shard tasks drain and close the publisher's
    // channel behind them.
    reporter_task.abort();
    flush_task.abort();
    for task in shard_tasks {
        let _ = task.await;
    }
    let _ = pub_task.await;
    let _ = sink.flush(FINAL_FLUSH);
    metrics.log_summary();
    Ok(())
}

fn input_loop(
    mut source: Box<dyn InputStream>,
    shard_txs: Vec<mpsc::Sender<Bytes>>,
    poll_timeout: Duration,
    metrics: Arc<Metrics>,
    shutdown: Arc<AtomicBool>,
) {
    let shard_n = shard_txs.len();
    let mut decode_log = Throttle::per_second();

    loop {
        if shutdown.load(Ordering::Relaxed) {
            info!("input: shutdown requested");
            break;
        }

        match source.next(poll_timeout) {
            Ok(Fetch::Msg(msg)) => {
                metrics.inc_consumed();
                match envelope::decode(&msg.payload) {
                    Ok(Envelope::Snapshot(view)) => {
                        let idx = shard_of(view.symbol(), shard_n);
                        if shard_txs[idx].blocking_send(msg.payload.clone()).is_err() {
                            break;
                        }
                    }
                    Ok(Envelope::Other(kind)) => {
                        debug!("input: dropping non-snapshot message {kind:?}");
                    }
                    Err(e) => {
                        metrics.inc_decode_errors();
                        if decode_log.allow() {
                            warn!(
                                "input: decode error at partition={} offset={}: {e}",
                                msg.partition, msg.offset
                            );
                        }
                    }
                }
            }
            Ok(Fetch::Idle) => continue,
            Ok(Fetch::Ended) => {
                info!("input: stream ended");
                break;
            }
            Err(e) => {
                error!("input: {e}");
                shutdown.store(true, Ordering::Relaxed);
                break;
            }
        }
    }

    source.close();
}

async fn shard_loop(
    mut shard: SymbolShard,
    mut rx: mpsc::Receiver<Bytes>,
    pub_tx: mpsc::Sender<PubCmd>,
    metrics: Arc<Metrics>,
) {
    let id = shard.id();
    let mut stale_log = Throttle::per_second();
    let mut apply_log = Throttle::per_second();
    info!("shard[{id}] started");

    while let Some(payload) = rx.recv().await {
        // The input loop already validated the envelope; anything else here
        // is a programming error and lands in the error counter.
        let view = match envelope::decode(&payload) {
            Ok(Envelope::Snapshot(view)) => view,
            _ => {
                metrics.inc_processing_errors();
                continue;
            }
        };

        let t0 = Instant::now();
        let now_us = epoch_micros();
        match shard.apply(&view, now_us) {
            Ok(out) => {
                if !out.accepted {
                    continue;
                }
                metrics.inc_processed();
                metrics.record_symbol(view.symbol());
                metrics.add_insufficient_depth(out.insufficient_depth);

                // CDC first, then snapshots ascending by depth; the
                // publisher preserves this order per symbol.
                for ev in &out.cdc {
                    let payload = Bytes::from(shard.renderer().cdc_json(ev));
                    if pub_tx
                        .send(PubCmd::Cdc {
                            symbol: ev.symbol.clone(),
                            payload,
                        })
                        .await
                        .is_err()
                    {
                        return;
                    }
                }
                for (depth, json) in out.rendered {
                    if pub_tx
                        .send(PubCmd::Snapshot {
                            symbol: view.symbol().to_string(),
                            depth,
                            payload: Bytes::from(json),
                        })
                        .await
                        .is_err()
                    {
                        return;
                    }
                }

                metrics.record_processing(t0.elapsed().as_micros() as u64);
            }
            Err(ApplyError::StaleSequence { incoming, applied }) => {
                metrics.inc_stale_drops();
                if stale_log.allow() {
                    debug!(
                        "shard[{id}]: stale sequence {incoming} behind {applied} for {}",
                        view.symbol()
                    );
                }
            }
            Err(e) => {
                metrics.inc_processing_errors();
                if apply_log.allow() {
                    warn!("shard[{id}]: {e}");
                }
            }
        }
    }

    info!("shard[{id}] stopped");
}

async fn publisher_loop(
    mut rx: mpsc::Receiver<PubCmd>,
    publisher: Publisher,
    latest: LatestSnapshots,
) {
    let mut publish_log = Throttle::per_second();

    while let Some(cmd) = rx.recv().await {
        match cmd {
            PubCmd::Snapshot {
                symbol,
                depth,
                payload,
            } => {
                if !publisher.publish_snapshot(&symbol, depth, &payload) && publish_log.allow() {
                    warn!("publish failed: snapshot {symbol} depth={depth}");
                }
                latest.insert(symbol, payload);
            }
            PubCmd::Cdc { symbol, payload } => {
                if !publisher.publish_cdc(&symbol, &payload) && publish_log.allow() {
                    warn!("publish failed: cdc {symbol}");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{MemorySink, MemorySource};
    use crate::envelope::encode_snapshot;

    fn snapshot_frame(symbol: &str, seq: u64, px: u64) -> Bytes {
        encode_snapshot(
            symbol,
            seq,
            &[(px, &[(1, 100)]), (px - 100, &[(2, 50)])],
            &[(px + 100, &[(3, 80)]), (px + 200, &[(4, 20)])],
            0,
            0,
        )
    }

    #[tokio::test]
    async fn end_to_end_over_memory_bus() {
        let mut cfg = Config::default();
        cfg.depth_config.levels = vec![2];
        cfg.json_config.compact_format = true;

        let source = Box::new(MemorySource::new([
            snapshot_frame("AAPL", 1, 1502500),
            snapshot_frame("MSFT", 1, 3000000),
            snapshot_frame("AAPL", 2, 1502600),
            crate::envelope::encode_heartbeat(),
        ]));
        let sink = Arc::new(MemorySink::new());
        let metrics = Arc::new(Metrics::new());
        let latest: LatestSnapshots = Arc::new(DashMap::new());

        run(
            cfg,
            source,
            sink.clone(),
            metrics.clone(),
            2,
            Arc::new(AtomicBool::new(false)),
            latest.clone(),
        )
        .await
        .unwrap();

        assert_eq!(metrics.messages_consumed.load(Ordering::Relaxed), 4);
        assert_eq!(metrics.messages_processed.load(Ordering::Relaxed), 3);

        let records = sink.take();
        // Three applies render depth 2; the second AAPL apply also diffs.
        let snapshots: Vec<_> = records
            .iter()
            .filter(|r| r.topic.starts_with("market_depth."))
            .collect();
        assert_eq!(snapshots.len(), 3);
        assert!(records.iter().any(|r| r.topic == "market_depth_cdc"));
        assert!(latest.contains_key("AAPL"));
        assert!(latest.contains_key("MSFT"));
    }

    #[tokio::test]
    async fn decode_errors_counted_not_fatal() {
        let source = Box::new(MemorySource::new([
            Bytes::from_static(b"garbage"),
            snapshot_frame("AAPL", 1, 1502500),
        ]));
        let sink = Arc::new(MemorySink::new());
        let metrics = Arc::new(Metrics::new());

        run(
            Config::default(),
            source,
            sink,
            metrics.clone(),
            1,
            Arc::new(AtomicBool::new(false)),
            Arc::new(DashMap::new()),
        )
        .await
        .unwrap();

        assert_eq!(metrics.decode_errors.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.messages_processed.load(Ordering::Relaxed), 1);
    }
}
