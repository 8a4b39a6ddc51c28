// src/publisher.rs
//! Output routing policy and publishing.
//!
//! Topic naming and partitioning are policy, not state: two modes for
//! snapshots (per-symbol topics by default, per-depth topics when
//! `use_depth_in_topic` is set), one fixed topic for CDC. The key of every
//! published message is the symbol string.

use std::sync::Arc;

use crate::bus::OutputSink;
use crate::config::TopicConfig;
use crate::metrics::Metrics;
use crate::shard::stable_hash;

pub struct TopicRouter {
    cfg: TopicConfig,
}

impl TopicRouter {
    pub fn new(cfg: TopicConfig) -> Self {
        Self { cfg }
    }

    fn partition_for(&self, symbol: &str) -> Option<u32> {
        if self.cfg.use_symbol_partitioning {
            Some((stable_hash(symbol) % self.cfg.num_partitions as u64) as u32)
        } else {
            None
        }
    }

    pub fn snapshot_route(&self, symbol: &str, depth: u32) -> (String, Option<u32>) {
        let topic = if self.cfg.use_depth_in_topic {
            format!("{}{depth}", self.cfg.snapshot_topic_prefix)
        } else {
            format!("{}{symbol}", self.cfg.snapshot_topic_prefix)
        };
        (topic, self.partition_for(symbol))
    }

    pub fn cdc_route(&self, symbol: &str) -> (String, Option<u32>) {
        (self.cfg.cdc_topic.clone(), self.partition_for(symbol))
    }
}

/// Fire-and-forget publisher. Failures bump a counter and the rest of the
/// message's artifacts continue to publish; flushing is the pipeline's
/// periodic job, never done here.
pub struct Publisher {
    router: TopicRouter,
    sink: Arc<dyn OutputSink>,
    metrics: Arc<Metrics>,
}

impl Publisher {
    pub fn new(router: TopicRouter, sink: Arc<dyn OutputSink>, metrics: Arc<Metrics>) -> Self {
        Self {
            router,
            sink,
            metrics,
        }
    }

    /// Returns whether the sink accepted the message.
    pub fn publish_snapshot(&self, symbol: &str, depth: u32, payload: &[u8]) -> bool {
        let (topic, partition) = self.router.snapshot_route(symbol, depth);
        self.send(&topic, partition, symbol, payload)
    }

    pub fn publish_cdc(&self, symbol: &str, payload: &[u8]) -> bool {
        let (topic, partition) = self.router.cdc_route(symbol);
        self.send(&topic, partition, symbol, payload)
    }

    fn send(&self, topic: &str, partition: Option<u32>, key: &str, payload: &[u8]) -> bool {
        match self.sink.publish(topic, partition, key, payload) {
            Ok(()) => {
                self.metrics.inc_published();
                true
            }
            Err(_) => {
                self.metrics.inc_publish_errors();
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::MemorySink;
    use std::sync::atomic::Ordering;

    fn router(use_depth: bool) -> TopicRouter {
        TopicRouter::new(TopicConfig {
            use_depth_in_topic: use_depth,
            ..TopicConfig::default()
        })
    }

    #[test]
    fn per_symbol_topic_mode() {
        let (topic, partition) = router(false).snapshot_route("AAPL", 10);
        assert_eq!(topic, "market_depth.AAPL");
        assert_eq!(partition, Some((stable_hash("AAPL") % 8) as u32));
    }

    #[test]
    fn per_depth_topic_mode() {
        let cfg = TopicConfig {
            snapshot_topic_prefix: "market_depth_snapshot_".to_string(),
            use_depth_in_topic: true,
            ..TopicConfig::default()
        };
        let (topic, _) = TopicRouter::new(cfg).snapshot_route("AAPL", 25);
        assert_eq!(topic, "market_depth_snapshot_25");
    }

    #[test]
    fn cdc_routes_to_fixed_topic_with_symbol_key() {
        let r = router(false);
        let (topic, partition) = r.cdc_route("MSFT");
        assert_eq!(topic, "market_depth_cdc");
        assert!(partition.is_some());

        let no_part = TopicRouter::new(TopicConfig {
            use_symbol_partitioning: false,
            ..TopicConfig::default()
        });
        assert_eq!(no_part.cdc_route("MSFT").1, None);
    }

    #[test]
    fn failed_publish_counts_and_siblings_continue() {
        let metrics = Arc::new(Metrics::new());
        let sink = Arc::new(MemorySink::rejecting("market_depth.AAPL"));
        let publisher = Publisher::new(router(false), sink.clone(), metrics.clone());

        assert!(!publisher.publish_snapshot("AAPL", 10, b"{}"));
        assert!(publisher.publish_cdc("AAPL", b"{}"));

        assert_eq!(metrics.publish_errors.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.messages_published.load(Ordering::Relaxed), 1);
        let records = sink.take();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].key, "AAPL");
    }
}
