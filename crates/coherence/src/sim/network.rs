//! Fixed-latency transport between endpoints.

use std::collections::{HashSet, VecDeque};

use tracing::{debug, trace};

use crate::channel::Admission;
use crate::common::addr::NodeId;
use crate::protocol::Message;

#[derive(Clone, Copy, Debug)]
struct InFlight {
    msg: Message,
    ready_at: u64,
}

/// Point-to-point transport with a fixed hop latency.
///
/// Messages to the same destination are delivered in the order they were sent.
/// A message the destination stalls (full response queue) stays in the network
/// and holds back everything queued behind it for that destination.
#[derive(Debug)]
pub struct Network {
    hop_latency: u64,
    in_flight: VecDeque<InFlight>,
    trace_messages: bool,
    /// Messages handed to an endpoint.
    pub delivered: u64,
    /// Delivery attempts refused with [`Admission::Stalled`].
    pub stalls: u64,
}

impl Network {
    /// Creates an empty transport.
    pub const fn new(hop_latency: u64, trace_messages: bool) -> Self {
        Self {
            hop_latency,
            in_flight: VecDeque::new(),
            trace_messages,
            delivered: 0,
            stalls: 0,
        }
    }

    /// Injects `msg` at cycle `now`.
    pub fn send(&mut self, msg: Message, now: u64) {
        if self.trace_messages {
            debug!(cycle = now, %msg, "send");
        }
        self.in_flight.push_back(InFlight {
            msg,
            ready_at: now + self.hop_latency,
        });
    }

    /// Offers every message due by `now` to its destination.
    ///
    /// # Arguments
    ///
    /// * `now` - Current cycle.
    /// * `offer` - Hands a message to its destination endpoint's channel.
    pub fn deliver(&mut self, now: u64, mut offer: impl FnMut(Message) -> Admission) {
        let mut blocked: HashSet<NodeId> = HashSet::new();
        let mut kept = VecDeque::with_capacity(self.in_flight.len());

        while let Some(entry) = self.in_flight.pop_front() {
            if entry.ready_at > now || blocked.contains(&entry.msg.dst) {
                if entry.ready_at <= now {
                    trace!(msg = %entry.msg, "held behind stalled message");
                }
                let _ = blocked.insert(entry.msg.dst);
                kept.push_back(entry);
                continue;
            }
            match offer(entry.msg) {
                Admission::Stalled => {
                    self.stalls += 1;
                    let _ = blocked.insert(entry.msg.dst);
                    kept.push_back(entry);
                }
                admission => {
                    if self.trace_messages {
                        debug!(cycle = now, msg = %entry.msg, ?admission, "deliver");
                    }
                    self.delivered += 1;
                }
            }
        }
        self.in_flight = kept;
    }

    /// Returns `true` when no message is in flight.
    pub fn is_empty(&self) -> bool {
        self.in_flight.is_empty()
    }

    /// Number of messages in flight.
    pub fn len(&self) -> usize {
        self.in_flight.len()
    }

    /// Drops every message in flight.
    pub fn clear(&mut self) {
        self.in_flight.clear();
    }
}
