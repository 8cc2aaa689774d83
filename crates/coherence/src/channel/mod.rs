//! Inbound message classification, buffering, and backpressure.
//!
//! Each endpoint owns one `MessageChannel`. It provides:
//! 1. **Classification:** Sorts inbound opcodes into the request or response queue; the
//!    directory and a cache node classify the opcode space differently.
//! 2. **Backpressure:** A full request queue rejects the message with a NACK addressed to
//!    its sender (`NackB` at the directory, `NackC` at a cache node). Responses are never
//!    rejected; a full response queue stalls them in the transport, as does a request
//!    arriving while the rejection queue itself is full.
//! 3. **Outbound arbitration:** The endpoint's own traffic and self-generated rejections
//!    share the outbound link under a round-robin grant.

/// Fixed-capacity FIFO.
pub mod queue;

use tracing::{trace, warn};

pub use self::queue::BoundedQueue;
use crate::common::addr::NodeId;
use crate::protocol::{Message, Opcode, OpcodeGroup};

/// Which side of the protocol an endpoint plays.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    /// Home node running the directory engine.
    Directory,
    /// Cache node running a responder.
    Cache,
}

/// Inbound queue a message is sorted into.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MessageClass {
    /// Work that may be rejected under backpressure.
    Request,
    /// Replies that must always eventually be consumed.
    Response,
}

/// Outcome of offering an inbound message to a channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Admission {
    /// Enqueued in the named queue.
    Queued(MessageClass),
    /// Request queue full; the NACK has been queued for the sender.
    Rejected(Opcode),
    /// Response queue full, or no room to queue a rejection; the transport must
    /// offer the message again later.
    Stalled,
    /// The opcode has no meaning for this endpoint's role.
    Dropped,
}

impl Role {
    /// Classifies an opcode for an endpoint playing this role.
    ///
    /// # Returns
    ///
    /// `None` when an endpoint of this role never receives the opcode.
    pub const fn classify(self, opcode: Opcode) -> Option<MessageClass> {
        match (self, opcode.group()) {
            (Self::Directory, OpcodeGroup::Request) | (Self::Cache, OpcodeGroup::Forward) => {
                Some(MessageClass::Request)
            }
            (Self::Directory, OpcodeGroup::Response)
            | (Self::Cache, OpcodeGroup::Grant | OpcodeGroup::Reject) => {
                Some(MessageClass::Response)
            }
            _ => None,
        }
    }

    /// NACK opcode this role emits when its request queue is full.
    pub const fn rejection(self) -> Opcode {
        match self {
            Self::Directory => Opcode::NackB,
            Self::Cache => Opcode::NackC,
        }
    }
}

/// Request/response queues plus outbound link for one endpoint.
#[derive(Debug)]
pub struct MessageChannel {
    role: Role,
    node: NodeId,
    requests: BoundedQueue<Message>,
    responses: BoundedQueue<Message>,
    outbound: BoundedQueue<Message>,
    rejections: BoundedQueue<Message>,
    prefer_rejection: bool,
    /// Requests refused because the request queue was full.
    pub rejected: u64,
    /// Messages dropped because the role never receives their opcode.
    pub dropped: u64,
}

impl MessageChannel {
    /// Creates a channel for endpoint `node`.
    ///
    /// # Arguments
    ///
    /// * `role` - Directory or cache classification rules.
    /// * `node` - Id used as the source of self-generated rejections.
    /// * `request_depth` - Request queue capacity.
    /// * `response_depth` - Response queue capacity.
    /// * `outbound_depth` - Outbound queue capacity; also bounds pending rejections.
    pub fn new(
        role: Role,
        node: NodeId,
        request_depth: usize,
        response_depth: usize,
        outbound_depth: usize,
    ) -> Self {
        Self {
            role,
            node,
            requests: BoundedQueue::new(request_depth),
            responses: BoundedQueue::new(response_depth),
            outbound: BoundedQueue::new(outbound_depth),
            rejections: BoundedQueue::new(outbound_depth),
            prefer_rejection: false,
            rejected: 0,
            dropped: 0,
        }
    }

    /// Role this channel classifies for.
    pub const fn role(&self) -> Role {
        self.role
    }

    /// Endpoint id this channel belongs to.
    pub const fn node(&self) -> NodeId {
        self.node
    }

    /// Offers an inbound message.
    pub fn accept(&mut self, msg: Message) -> Admission {
        let Some(class) = self.role.classify(msg.opcode) else {
            warn!(node = %self.node, %msg, "dropping message with no meaning for this role");
            self.dropped += 1;
            return Admission::Dropped;
        };

        match class {
            MessageClass::Request => match self.requests.push(msg) {
                Ok(()) => Admission::Queued(class),
                Err(msg) => {
                    let nack = self.role.rejection();
                    let reply = Message {
                        opcode: nack,
                        addr: msg.addr,
                        src: self.node,
                        dst: msg.src,
                        requestor: msg.requestor,
                        data: 0,
                    };
                    if self.rejections.push(reply).is_err() {
                        trace!(node = %self.node, %msg, "rejection queue full");
                        return Admission::Stalled;
                    }
                    trace!(node = %self.node, %msg, %nack, "request queue full");
                    self.rejected += 1;
                    Admission::Rejected(nack)
                }
            },
            MessageClass::Response => match self.responses.push(msg) {
                Ok(()) => Admission::Queued(class),
                Err(_) => Admission::Stalled,
            },
        }
    }

    /// Pops the oldest queued request.
    pub fn pop_request(&mut self) -> Option<Message> {
        self.requests.pop()
    }

    /// Pops the oldest queued response.
    pub fn pop_response(&mut self) -> Option<Message> {
        self.responses.pop()
    }

    /// Oldest queued request, left in place.
    pub fn peek_request(&self) -> Option<&Message> {
        self.requests.peek()
    }

    /// Returns `true` when a response is waiting.
    pub fn has_response(&self) -> bool {
        !self.responses.is_empty()
    }

    /// Returns `true` when a request is waiting.
    pub fn has_request(&self) -> bool {
        !self.requests.is_empty()
    }

    /// Returns `true` when the request queue would reject the next request.
    pub fn request_full(&self) -> bool {
        self.requests.is_full()
    }

    /// Queues an outbound message from the owning engine.
    ///
    /// # Errors
    ///
    /// Returns the message when the outbound queue is full; the engine retries next tick.
    pub fn send(&mut self, msg: Message) -> Result<(), Message> {
        self.outbound.push(msg)
    }

    /// Returns `true` when `send` would succeed.
    pub fn can_send(&self) -> bool {
        !self.outbound.is_full()
    }

    /// Takes the next message for the transport.
    ///
    /// Engine traffic and rejections alternate whenever both are waiting.
    pub fn pop_outbound(&mut self) -> Option<Message> {
        let both = !self.outbound.is_empty() && !self.rejections.is_empty();
        let take_rejection = if both {
            self.prefer_rejection
        } else {
            self.outbound.is_empty()
        };
        let msg = if take_rejection {
            self.rejections.pop()
        } else {
            self.outbound.pop()
        };
        if both {
            self.prefer_rejection = !take_rejection;
        }
        msg
    }

    /// Returns `true` when nothing is queued in any direction.
    pub fn is_idle(&self) -> bool {
        self.requests.is_empty()
            && self.responses.is_empty()
            && self.outbound.is_empty()
            && self.rejections.is_empty()
    }

    /// Discards all queued traffic.
    pub fn clear(&mut self) {
        self.requests.clear();
        self.responses.clear();
        self.outbound.clear();
        self.rejections.clear();
    }
}
