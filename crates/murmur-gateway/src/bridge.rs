//! The telemetry bridge: queueing, triggers, retry and drop accounting

use std::collections::VecDeque;

use murmur_core::Tick;

use crate::{TelemetryRecord, TelemetryUplink};

/// Bridge timing and bounds, in ticks.
#[derive(Clone, Debug)]
pub struct BridgeConfig {
    /// Periodic push interval
    pub push_interval: Tick,
    /// Minimum gap between state-change-triggered pushes (debounce)
    pub min_state_gap: Tick,
    /// Attempts per record before it is dropped
    pub max_attempts: u32,
    /// Base retry backoff, doubled per failed attempt
    pub backoff_base: Tick,
    /// Pending-queue bound; overflow evicts the oldest record
    pub max_pending: usize,
    /// Push attempts allowed per service call, so retries never starve
    /// mesh servicing
    pub max_pushes_per_tick: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        BridgeConfig {
            push_interval: 30,
            min_state_gap: 2,
            max_attempts: 3,
            backoff_base: 4,
            max_pending: 16,
            max_pushes_per_tick: 4,
        }
    }
}

/// Failure and throughput counters, queryable via the command surface.
#[derive(Clone, Copy, Debug, Default)]
pub struct BridgeStats {
    pub pushed: u64,
    pub failed_attempts: u64,
    /// Records abandoned after exhausting their retry budget
    pub dropped: u64,
    /// Records evicted because the pending queue was full
    pub overflowed: u64,
}

#[derive(Debug)]
struct PendingPush {
    record: TelemetryRecord,
    attempts: u32,
    next_attempt: Tick,
}

/// Relays telemetry records to the external uplink, fire-and-forget from
/// the mesh's point of view.
pub struct GatewayBridge<U> {
    config: BridgeConfig,
    uplink: U,
    pending: VecDeque<PendingPush>,
    last_periodic: Tick,
    last_state_push: Tick,
    stats: BridgeStats,
}

impl<U: TelemetryUplink> GatewayBridge<U> {
    pub fn new(config: BridgeConfig, uplink: U) -> Self {
        GatewayBridge {
            config,
            uplink,
            pending: VecDeque::new(),
            last_periodic: 0,
            last_state_push: 0,
            stats: BridgeStats::default(),
        }
    }

    pub fn stats(&self) -> BridgeStats {
        self.stats
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn uplink(&self) -> &U {
        &self.uplink
    }

    /// Is the periodic push due this tick?
    pub fn periodic_due(&self, now: Tick) -> bool {
        now.saturating_sub(self.last_periodic) >= self.config.push_interval
    }

    /// Debounce gate for state-change-triggered pushes. Passing consumes
    /// the gate.
    pub fn on_local_change(&mut self, now: Tick) -> bool {
        if now.saturating_sub(self.last_state_push) < self.config.min_state_gap {
            return false;
        }
        self.last_state_push = now;
        true
    }

    /// Queue the gateway's own record; resets the periodic timer so a
    /// change-triggered push also satisfies the interval.
    pub fn enqueue_local(&mut self, record: TelemetryRecord, now: Tick) {
        self.last_periodic = now;
        self.enqueue(record, now);
    }

    /// Queue a record relayed from another mesh node.
    pub fn enqueue_remote(&mut self, record: TelemetryRecord, now: Tick) {
        self.enqueue(record, now);
    }

    fn enqueue(&mut self, record: TelemetryRecord, now: Tick) {
        if self.pending.len() >= self.config.max_pending {
            self.pending.pop_front();
            self.stats.overflowed += 1;
            tracing::warn!("telemetry queue full, evicted oldest record");
        }
        self.pending.push_back(PendingPush {
            record,
            attempts: 0,
            next_attempt: now,
        });
    }

    /// Attempt due pushes, bounded per call. Failed records are retried
    /// with exponential backoff until their attempt budget runs out, then
    /// dropped with a counter increment. Never fatal.
    pub fn service(&mut self, now: Tick) {
        let mut budget = self.config.max_pushes_per_tick;
        let mut requeue = Vec::new();

        while budget > 0 {
            let Some(mut item) = self.pending.pop_front() else {
                break;
            };
            if item.next_attempt > now {
                requeue.push(item);
                continue;
            }
            budget -= 1;

            match self.uplink.push(&item.record) {
                Ok(()) => {
                    self.stats.pushed += 1;
                }
                Err(err) => {
                    self.stats.failed_attempts += 1;
                    item.attempts += 1;
                    if item.attempts >= self.config.max_attempts {
                        self.stats.dropped += 1;
                        tracing::warn!(
                            node = %item.record.node,
                            attempts = item.attempts,
                            %err,
                            "telemetry record dropped"
                        );
                    } else {
                        item.next_attempt = now + (self.config.backoff_base << item.attempts);
                        requeue.push(item);
                    }
                }
            }
        }

        // Not-yet-due and retrying records go back in arrival order.
        for item in requeue.into_iter().rev() {
            self.pending.push_front(item);
        }
    }
}

impl<U> std::fmt::Debug for GatewayBridge<U> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayBridge")
            .field("pending", &self.pending.len())
            .field("stats", &self.stats)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ScriptedUplink;
    use murmur_core::{NodeId, RoleTag};

    fn record(node: u32) -> TelemetryRecord {
        TelemetryRecord {
            node: NodeId::new(node),
            role: RoleTag::from("button"),
            uptime_ticks: 10,
            peer_count: 2,
            collected_at: 10,
            state: vec![("led".into(), "1".into())],
        }
    }

    fn bridge(uplink: ScriptedUplink) -> GatewayBridge<ScriptedUplink> {
        GatewayBridge::new(BridgeConfig::default(), uplink)
    }

    #[test]
    fn test_push_success() {
        let mut bridge = bridge(ScriptedUplink::up());
        bridge.enqueue_remote(record(7), 0);
        bridge.service(0);

        assert_eq!(bridge.stats().pushed, 1);
        assert_eq!(bridge.pending_len(), 0);
        assert_eq!(bridge.uplink().delivered[0].node, NodeId::new(7));
    }

    #[test]
    fn test_retry_then_success() {
        let mut uplink = ScriptedUplink::up();
        uplink.script(Err(murmur_core::MurmurError::UplinkUnavailable("x".into())));
        let mut bridge = bridge(uplink);

        bridge.enqueue_remote(record(7), 0);
        bridge.service(0);
        assert_eq!(bridge.stats().failed_attempts, 1);
        assert_eq!(bridge.pending_len(), 1);

        // Not due yet: backoff_base << 1 = 8 ticks out.
        bridge.service(4);
        assert_eq!(bridge.stats().pushed, 0);

        bridge.service(8);
        assert_eq!(bridge.stats().pushed, 1);
        assert_eq!(bridge.stats().dropped, 0);
    }

    #[test]
    fn test_retry_budget_exhaustion_drops_once() {
        let mut bridge = bridge(ScriptedUplink::down());
        bridge.enqueue_remote(record(7), 0);

        for now in 0..100 {
            bridge.service(now);
        }

        assert_eq!(bridge.stats().dropped, 1);
        assert_eq!(
            bridge.stats().failed_attempts,
            BridgeConfig::default().max_attempts as u64
        );
        assert_eq!(bridge.pending_len(), 0);
    }

    #[test]
    fn test_uplink_down_five_cycles_counts_exactly_five() {
        // Five push cycles against a dead uplink end with the drop
        // counter at exactly 5, not unbounded.
        let mut bridge = bridge(ScriptedUplink::down());
        let interval = bridge.config().push_interval;

        let mut now = 0;
        for _cycle in 0..5 {
            now += interval;
            assert!(bridge.periodic_due(now));
            bridge.enqueue_local(record(1), now);
            for t in now..now + interval {
                bridge.service(t);
            }
        }

        assert_eq!(bridge.stats().dropped, 5);
        assert_eq!(bridge.pending_len(), 0);
    }

    #[test]
    fn test_state_change_debounce() {
        let mut bridge = bridge(ScriptedUplink::up());
        assert!(bridge.on_local_change(10));
        assert!(!bridge.on_local_change(11));
        assert!(bridge.on_local_change(12));
    }

    #[test]
    fn test_local_push_resets_periodic_timer() {
        let mut bridge = bridge(ScriptedUplink::up());
        bridge.enqueue_local(record(1), 10);
        assert!(!bridge.periodic_due(20));
        assert!(bridge.periodic_due(40));
    }

    #[test]
    fn test_pending_queue_bounded() {
        let mut bridge = GatewayBridge::new(
            BridgeConfig {
                max_pending: 3,
                ..Default::default()
            },
            ScriptedUplink::down(),
        );

        for i in 0..10 {
            bridge.enqueue_remote(record(i), 0);
        }

        assert_eq!(bridge.pending_len(), 3);
        assert_eq!(bridge.stats().overflowed, 7);
    }
}
