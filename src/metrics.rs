// src/metrics.rs
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

/// Process-wide counters. All increments are relaxed atomics; the
/// per-symbol tally is the only concurrent container.
pub struct Metrics {
    pub messages_consumed: AtomicU64,
    pub messages_processed: AtomicU64,
    pub messages_published: AtomicU64,
    pub processing_errors: AtomicU64,
    pub decode_errors: AtomicU64,
    pub stale_sequence_drops: AtomicU64,
    pub publish_errors: AtomicU64,
    pub insufficient_depth: AtomicU64,

    total_processing_us: AtomicU64,
    max_processing_us: AtomicU64,
    min_processing_us: AtomicU64,

    per_symbol: DashMap<String, u64>,
    start: Instant,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            messages_consumed: AtomicU64::new(0),
            messages_processed: AtomicU64::new(0),
            messages_published: AtomicU64::new(0),
            processing_errors: AtomicU64::new(0),
            decode_errors: AtomicU64::new(0),
            stale_sequence_drops: AtomicU64::new(0),
            publish_errors: AtomicU64::new(0),
            insufficient_depth: AtomicU64::new(0),
            total_processing_us: AtomicU64::new(0),
            max_processing_us: AtomicU64::new(0),
            min_processing_us: AtomicU64::new(u64::MAX),
            per_symbol: DashMap::new(),
            start: Instant::now(),
        }
    }

    #[inline]
    pub fn inc_consumed(&self) {
        self.messages_consumed.fetch_add(1, Ordering::Relaxed);
    }
    #[inline]
    pub fn inc_processed(&self) {
        self.messages_processed.fetch_add(1, Ordering::Relaxed);
    }
    #[inline]
    pub fn inc_published(&self) {
        self.messages_published.fetch_add(1, Ordering::Relaxed);
    }
    #[inline]
    pub fn inc_processing_errors(&self) {
        self.processing_errors.fetch_add(1, Ordering::Relaxed);
    }
    #[inline]
    pub fn inc_decode_errors(&self) {
        self.decode_errors.fetch_add(1, Ordering::Relaxed);
    }
    #[inline]
    pub fn inc_stale_drops(&self) {
        self.stale_sequence_drops.fetch_add(1, Ordering::Relaxed);
    }
    #[inline]
    pub fn inc_publish_errors(&self) {
        self.publish_errors.fetch_add(1, Ordering::Relaxed);
    }
    #[inline]
    pub fn add_insufficient_depth(&self, n: u64) {
        if n > 0 {
            self.insufficient_depth.fetch_add(n, Ordering::Relaxed);
        }
    }

    /// Per-message processing time: apply + render + hand-off to the sink.
    #[inline]
    pub fn record_processing(&self, us: u64) {
        self.total_processing_us.fetch_add(us, Ordering::Relaxed);
        self.max_processing_us.fetch_max(us, Ordering::Relaxed);
        self.min_processing_us.fetch_min(us, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_symbol(&self, symbol: &str) {
        // get_mut first so the steady state never allocates the key.
        if let Some(mut count) = self.per_symbol.get_mut(symbol) {
            *count += 1;
        } else {
            *self.per_symbol.entry(symbol.to_owned()).or_insert(0) += 1;
        }
    }

    pub fn active_symbols(&self) -> usize {
        self.per_symbol.len()
    }

    pub fn symbol_counts(&self) -> Vec<(String, u64)> {
        self.per_symbol
            .iter()
            .map(|e| (e.key().clone(), *e.value()))
            .collect()
    }

    pub fn top_symbols(&self, n: usize) -> Vec<(String, u64)> {
        let mut counts = self.symbol_counts();
        counts.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        counts.truncate(n);
        counts
    }

    pub fn log_summary(&self) {
        let elapsed = self.start.elapsed().as_secs_f64();
        let consumed = self.messages_consumed.load(Ordering::Relaxed);
        let processed = self.messages_processed.load(Ordering::Relaxed);
        let published = self.messages_published.load(Ordering::Relaxed);
        let errors = self.processing_errors.load(Ordering::Relaxed);
        let decode_errors = self.decode_errors.load(Ordering::Relaxed);
        let stale = self.stale_sequence_drops.load(Ordering::Relaxed);
        let publish_errors = self.publish_errors.load(Ordering::Relaxed);

        let total_us = self.total_processing_us.load(Ordering::Relaxed);
        let max_us = self.max_processing_us.load(Ordering::Relaxed);
        let min_us = self.min_processing_us.load(Ordering::Relaxed);
        let min_us = if min_us == u64::MAX { 0 } else { min_us };
        let mean_us = if processed > 0 {
            total_us as f64 / processed as f64
        } else {
            0.0
        };
        let rate = if elapsed > 0.0 { consumed as f64 / elapsed } else { 0.0 };

        info!(
            "stats: consumed={consumed} processed={processed} published={published} rate={rate:.1}/s"
        );
        info!(
            "stats: errors processing={errors} decode={decode_errors} stale={stale} publish={publish_errors}"
        );
        info!("stats: processing_us mean={mean_us:.1} min={min_us} max={max_us}");

        let top = self.top_symbols(10);
        if !top.is_empty() {
            let list: Vec<String> = top.iter().map(|(s, c)| format!("{s}={c}")).collect();
            info!(
                "stats: active_symbols={} top10 {}",
                self.active_symbols(),
                list.join(" ")
            );
        }
    }

    pub fn prometheus_text(&self) -> String {
        let consumed = self.messages_consumed.load(Ordering::Relaxed);
        let processed = self.messages_processed.load(Ordering::Relaxed);
        let published = self.messages_published.load(Ordering::Relaxed);
        let perr = self.processing_errors.load(Ordering::Relaxed);
        let derr = self.decode_errors.load(Ordering::Relaxed);
        let stale = self.stale_sequence_drops.load(Ordering::Relaxed);
        let puberr = self.publish_errors.load(Ordering::Relaxed);
        let shallow = self.insufficient_depth.load(Ordering::Relaxed);
        let symbols = self.active_symbols();

        format!(
            "\
# TYPE market_depth_messages_consumed_total counter
market_depth_messages_consumed_total {consumed}
# TYPE market_depth_messages_processed_total counter
market_depth_messages_processed_total {processed}
# TYPE market_depth_messages_published_total counter
market_depth_messages_published_total {published}
# TYPE market_depth_processing_errors_total counter
market_depth_processing_errors_total {perr}
# TYPE market_depth_decode_errors_total counter
market_depth_decode_errors_total {derr}
# TYPE market_depth_stale_sequence_drops_total counter
market_depth_stale_sequence_drops_total {stale}
# TYPE market_depth_publish_errors_total counter
market_depth_publish_errors_total {puberr}
# TYPE market_depth_insufficient_depth_total counter
market_depth_insufficient_depth_total {shallow}
# TYPE market_depth_active_symbols gauge
market_depth_active_symbols {symbols}
"
        )
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
