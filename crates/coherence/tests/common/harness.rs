//! Single-engine harnesses.
//!
//! Each harness owns one engine and its channel. Tests hand messages in with
//! `deliver`, tick a fixed number of cycles with `run`, and get back everything
//! the engine sent, in order. Messages travel between harnesses only when a test
//! moves them, so races can be staged exactly.

use coherence_core::channel::{Admission, MessageChannel, Role};
use coherence_core::common::NodeId;
use coherence_core::config::Config;
use coherence_core::directory::DirectoryEngine;
use coherence_core::memory::BackingStore;
use coherence_core::protocol::Message;
use coherence_core::responder::CacheResponder;
use coherence_core::responder::local::{LocalEvent, LocalRequest};

/// Cycles `run` ticks for; enough for any single protocol step at test latencies.
pub const RUN_CYCLES: usize = 200;

/// Installs a test subscriber once; honours `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Directory engine with its channel.
pub struct DirHarness {
    pub engine: DirectoryEngine,
    pub channel: MessageChannel,
}

impl DirHarness {
    pub fn new(config: &Config) -> Self {
        init_tracing();
        Self::wrap(config, DirectoryEngine::new(config))
    }

    pub fn with_backing(config: &Config, backing: Box<dyn BackingStore>) -> Self {
        init_tracing();
        Self::wrap(config, DirectoryEngine::with_backing(config, backing))
    }

    fn wrap(config: &Config, engine: DirectoryEngine) -> Self {
        Self {
            engine,
            channel: MessageChannel::new(
                Role::Directory,
                NodeId::DIRECTORY,
                config.directory.request_queue,
                config.directory.response_queue,
                config.directory.outbound_queue,
            ),
        }
    }

    pub fn deliver(&mut self, msg: Message) -> Admission {
        self.channel.accept(msg)
    }

    /// Ticks `RUN_CYCLES` times, collecting everything sent.
    pub fn run(&mut self) -> Vec<Message> {
        self.run_for(RUN_CYCLES)
    }

    pub fn run_for(&mut self, cycles: usize) -> Vec<Message> {
        let mut out = Vec::new();
        for _ in 0..cycles {
            self.engine.tick(&mut self.channel);
            while let Some(msg) = self.channel.pop_outbound() {
                out.push(msg);
            }
        }
        out
    }

    /// Delivers `msg` and runs.
    pub fn send(&mut self, msg: Message) -> Vec<Message> {
        let _ = self.deliver(msg);
        self.run()
    }
}

/// Cache responder with its channel.
pub struct NodeHarness {
    pub responder: CacheResponder,
    pub channel: MessageChannel,
}

impl NodeHarness {
    pub fn new(node: u16, config: &Config) -> Self {
        init_tracing();
        let id = NodeId(node);
        Self {
            responder: CacheResponder::new(id, config),
            channel: MessageChannel::new(
                Role::Cache,
                id,
                config.node.request_queue,
                config.node.response_queue,
                config.node.outbound_queue,
            ),
        }
    }

    pub fn deliver(&mut self, msg: Message) -> Admission {
        self.channel.accept(msg)
    }

    pub fn run(&mut self) -> Vec<Message> {
        let mut out = Vec::new();
        for _ in 0..RUN_CYCLES {
            self.responder.tick(&mut self.channel);
            while let Some(msg) = self.channel.pop_outbound() {
                out.push(msg);
            }
        }
        out
    }

    /// Submits a local request and runs until it is on the wire.
    pub fn submit(&mut self, req: LocalRequest) -> Vec<Message> {
        self.responder.submit(req).unwrap();
        self.run()
    }

    pub fn events(&mut self) -> Vec<LocalEvent> {
        std::iter::from_fn(|| self.responder.take_event()).collect()
    }
}
