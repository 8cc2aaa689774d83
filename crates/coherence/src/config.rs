//! Configuration system for the coherence engines and simulator.
//!
//! This module defines all configuration structures and enums used to parameterize
//! the system. It provides:
//! 1. **Defaults:** Baseline protocol, store geometry, queue, memory, and transport constants.
//! 2. **Structures:** Hierarchical config for general, protocol, directory, node, memory, and network.
//! 3. **Enums:** Replacement policy and memory controller types.
//! 4. **Loading:** JSON parsing and validation into a typed [`ConfigError`] on failure.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::common::error::ConfigError;
use crate::protocol::MIN_OPCODE_BITS;

/// Default configuration constants.
///
/// These values define the baseline system when a field is not supplied in the
/// JSON configuration.
mod defaults {
    /// Coherence block size in bytes.
    pub const LINE_BYTES: usize = 64;

    /// Upper bound on simulated cycles before `run_until_quiescent` gives up.
    pub const MAX_CYCLES: u64 = 1_000_000;

    /// log2 of the sharer slots per directory entry (4 slots).
    pub const NUM_SHARERS_BITS: u32 = 2;

    /// Capacity of the directory's active transaction table.
    pub const ACTIVE_REQS: usize = 4;

    /// Width of an opcode on the wire.
    ///
    /// The fixed encoding table uses codes 0..=14, so four bits is the minimum.
    pub const OPCODE_BITS: u32 = 4;

    /// Directory store sets.
    pub const DIR_SETS: usize = 64;

    /// Directory store associativity.
    pub const DIR_WAYS: usize = 4;

    /// Number of cache nodes.
    pub const NODE_COUNT: usize = 4;

    /// Line cache sets per node.
    pub const NODE_SETS: usize = 32;

    /// Line cache associativity per node.
    pub const NODE_WAYS: usize = 2;

    /// Depth of each inbound request/response queue.
    pub const QUEUE_DEPTH: usize = 4;

    /// Depth of each outbound queue.
    pub const OUTBOUND_DEPTH: usize = 4;

    /// Fixed backing store latency in cycles.
    pub const MEMORY_LATENCY: u64 = 10;

    /// CAS latency in memory cycles.
    pub const T_CAS: u64 = 14;

    /// RAS latency in memory cycles.
    pub const T_RAS: u64 = 14;

    /// Precharge latency in memory cycles.
    pub const T_PRE: u64 = 14;

    /// Cycles a message spends in the transport.
    pub const HOP_LATENCY: u64 = 2;
}

/// Replacement policy used by a set-associative store on a miss with no free way.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ReplacementPolicy {
    /// Least Recently Used.
    #[default]
    #[serde(alias = "Lru")]
    Lru,
    /// First In First Out (round-robin per set).
    #[serde(alias = "Fifo")]
    Fifo,
    /// Pseudo-random (xorshift).
    #[serde(alias = "Random")]
    Random,
}

/// Backing store latency model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum MemoryController {
    /// Fixed latency for every access.
    #[default]
    Simple,
    /// Row-buffer-aware latency (CAS, RAS, precharge).
    #[serde(alias = "DRAM")]
    Dram,
}

/// Root configuration structure.
///
/// # Examples
///
/// ```
/// use coherence_core::config::Config;
///
/// let config = Config::default();
/// assert_eq!(config.protocol.sharer_slots(), 4);
/// assert!(config.validate().is_ok());
/// ```
///
/// Deserializing a partial JSON document; omitted fields take their defaults:
///
/// ```
/// use coherence_core::config::{Config, ReplacementPolicy};
///
/// let json = r#"{
///     "protocol": { "num_sharers_bits": 1, "active_reqs": 2 },
///     "directory": { "sets": 1, "ways": 1, "policy": "Fifo" },
///     "node": { "count": 8, "collision_guard": false }
/// }"#;
///
/// let config = Config::from_json_str(json).unwrap();
/// assert_eq!(config.protocol.sharer_slots(), 2);
/// assert_eq!(config.directory.policy, ReplacementPolicy::Fifo);
/// assert_eq!(config.node.count, 8);
/// assert!(!config.node.collision_guard);
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// General simulation settings
    #[serde(default)]
    pub general: GeneralConfig,
    /// Protocol resource limits and encoding
    #[serde(default)]
    pub protocol: ProtocolConfig,
    /// Home directory store and queues
    #[serde(default)]
    pub directory: DirectoryConfig,
    /// Cache node stores, queues, and coupling options
    #[serde(default)]
    pub node: NodeConfig,
    /// Backing store latency
    #[serde(default)]
    pub memory: MemoryConfig,
    /// Transport between endpoints
    #[serde(default)]
    pub network: NetworkConfig,
}

impl Config {
    /// Parses a configuration from JSON text and validates it.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] for malformed JSON and any validation error
    /// reported by [`Config::validate`].
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses, and validates a JSON configuration file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] when the file cannot be read, otherwise as
    /// [`Config::from_json_str`].
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&text)
    }

    /// Checks every parameter the engines rely on.
    ///
    /// # Errors
    ///
    /// Returns the first invalid field found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        power_of_two("general.line_bytes", self.general.line_bytes)?;
        power_of_two("directory.sets", self.directory.sets)?;
        non_zero("directory.ways", self.directory.ways)?;
        power_of_two("node.sets", self.node.sets)?;
        non_zero("node.ways", self.node.ways)?;

        if self.protocol.num_sharers_bits > 6 {
            return Err(ConfigError::OutOfRange {
                field: "protocol.num_sharers_bits",
                value: u64::from(self.protocol.num_sharers_bits),
                expected: "0..=6",
            });
        }
        if self.protocol.active_reqs == 0 {
            return Err(ConfigError::OutOfRange {
                field: "protocol.active_reqs",
                value: 0,
                expected: ">= 1",
            });
        }
        if !(MIN_OPCODE_BITS..=8).contains(&self.protocol.opcode_bits) {
            return Err(ConfigError::OutOfRange {
                field: "protocol.opcode_bits",
                value: u64::from(self.protocol.opcode_bits),
                expected: "4..=8",
            });
        }
        if self.node.count == 0 || self.node.count >= usize::from(u16::MAX) {
            return Err(ConfigError::OutOfRange {
                field: "node.count",
                value: self.node.count as u64,
                expected: "1..65535",
            });
        }

        for (field, depth) in [
            ("directory.request_queue", self.directory.request_queue),
            ("directory.response_queue", self.directory.response_queue),
            ("directory.outbound_queue", self.directory.outbound_queue),
            ("node.request_queue", self.node.request_queue),
            ("node.response_queue", self.node.response_queue),
            ("node.outbound_queue", self.node.outbound_queue),
        ] {
            non_zero(field, depth)?;
        }
        Ok(())
    }
}

fn non_zero(field: &'static str, value: usize) -> Result<(), ConfigError> {
    if value == 0 {
        return Err(ConfigError::Geometry { field, value });
    }
    Ok(())
}

fn power_of_two(field: &'static str, value: usize) -> Result<(), ConfigError> {
    if !value.is_power_of_two() {
        return Err(ConfigError::Geometry { field, value });
    }
    Ok(())
}

/// General simulation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Coherence block size in bytes
    #[serde(default = "GeneralConfig::default_line_bytes")]
    pub line_bytes: usize,

    /// Cycle budget for `run_until_quiescent`
    #[serde(default = "GeneralConfig::default_max_cycles")]
    pub max_cycles: u64,

    /// Log every protocol message delivered by the transport
    #[serde(default)]
    pub trace_messages: bool,
}

impl GeneralConfig {
    fn default_line_bytes() -> usize {
        defaults::LINE_BYTES
    }

    fn default_max_cycles() -> u64 {
        defaults::MAX_CYCLES
    }
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            line_bytes: defaults::LINE_BYTES,
            max_cycles: defaults::MAX_CYCLES,
            trace_messages: false,
        }
    }
}

/// Protocol resource limits and encoding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtocolConfig {
    /// log2 of the sharer slots per directory entry
    #[serde(default = "ProtocolConfig::default_num_sharers_bits")]
    pub num_sharers_bits: u32,

    /// Capacity of the active transaction table
    #[serde(default = "ProtocolConfig::default_active_reqs")]
    pub active_reqs: usize,

    /// Wire width of an opcode
    #[serde(default = "ProtocolConfig::default_opcode_bits")]
    pub opcode_bits: u32,
}

impl ProtocolConfig {
    fn default_num_sharers_bits() -> u32 {
        defaults::NUM_SHARERS_BITS
    }

    fn default_active_reqs() -> usize {
        defaults::ACTIVE_REQS
    }

    fn default_opcode_bits() -> u32 {
        defaults::OPCODE_BITS
    }

    /// Number of sharer slots per directory entry (`2^num_sharers_bits`).
    pub const fn sharer_slots(&self) -> usize {
        1 << self.num_sharers_bits
    }
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            num_sharers_bits: defaults::NUM_SHARERS_BITS,
            active_reqs: defaults::ACTIVE_REQS,
            opcode_bits: defaults::OPCODE_BITS,
        }
    }
}

/// Home directory store geometry and queue depths.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectoryConfig {
    /// Directory sets
    #[serde(default = "DirectoryConfig::default_sets")]
    pub sets: usize,

    /// Directory ways per set
    #[serde(default = "DirectoryConfig::default_ways")]
    pub ways: usize,

    /// Replacement policy for capacity misses
    #[serde(default)]
    pub policy: ReplacementPolicy,

    /// Inbound request queue depth
    #[serde(default = "default_queue_depth")]
    pub request_queue: usize,

    /// Inbound response queue depth
    #[serde(default = "default_queue_depth")]
    pub response_queue: usize,

    /// Outbound queue depth
    #[serde(default = "default_outbound_depth")]
    pub outbound_queue: usize,
}

impl DirectoryConfig {
    fn default_sets() -> usize {
        defaults::DIR_SETS
    }

    fn default_ways() -> usize {
        defaults::DIR_WAYS
    }
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            sets: defaults::DIR_SETS,
            ways: defaults::DIR_WAYS,
            policy: ReplacementPolicy::default(),
            request_queue: defaults::QUEUE_DEPTH,
            response_queue: defaults::QUEUE_DEPTH,
            outbound_queue: defaults::OUTBOUND_DEPTH,
        }
    }
}

/// Cache node store geometry, queue depths, and controller coupling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Number of cache nodes (ids 1..=count)
    #[serde(default = "NodeConfig::default_count")]
    pub count: usize,

    /// Line cache sets
    #[serde(default = "NodeConfig::default_sets")]
    pub sets: usize,

    /// Line cache ways per set
    #[serde(default = "NodeConfig::default_ways")]
    pub ways: usize,

    /// Replacement policy for line installs
    #[serde(default)]
    pub policy: ReplacementPolicy,

    /// Inbound request (forward) queue depth
    #[serde(default = "default_queue_depth")]
    pub request_queue: usize,

    /// Inbound response queue depth
    #[serde(default = "default_queue_depth")]
    pub response_queue: usize,

    /// Outbound queue depth
    #[serde(default = "default_outbound_depth")]
    pub outbound_queue: usize,

    /// Installed lines are also held by an upper level; forwards go through the controller
    #[serde(default)]
    pub upper_level_inclusion: bool,

    /// Detour forwards that collide with a staged local request through `Backoff`
    #[serde(default = "NodeConfig::default_collision_guard")]
    pub collision_guard: bool,
}

impl NodeConfig {
    fn default_count() -> usize {
        defaults::NODE_COUNT
    }

    fn default_sets() -> usize {
        defaults::NODE_SETS
    }

    fn default_ways() -> usize {
        defaults::NODE_WAYS
    }

    fn default_collision_guard() -> bool {
        true
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            count: defaults::NODE_COUNT,
            sets: defaults::NODE_SETS,
            ways: defaults::NODE_WAYS,
            policy: ReplacementPolicy::default(),
            request_queue: defaults::QUEUE_DEPTH,
            response_queue: defaults::QUEUE_DEPTH,
            outbound_queue: defaults::OUTBOUND_DEPTH,
            upper_level_inclusion: false,
            collision_guard: true,
        }
    }
}

fn default_queue_depth() -> usize {
    defaults::QUEUE_DEPTH
}

fn default_outbound_depth() -> usize {
    defaults::OUTBOUND_DEPTH
}

/// Backing store latency configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Latency model
    #[serde(default)]
    pub controller: MemoryController,

    /// Fixed latency for the simple controller
    #[serde(default = "MemoryConfig::default_latency")]
    pub latency: u64,

    /// CAS latency (column access strobe)
    #[serde(default = "MemoryConfig::default_t_cas")]
    pub t_cas: u64,

    /// RAS latency (row access strobe)
    #[serde(default = "MemoryConfig::default_t_ras")]
    pub t_ras: u64,

    /// Precharge latency
    #[serde(default = "MemoryConfig::default_t_pre")]
    pub t_pre: u64,
}

impl MemoryConfig {
    fn default_latency() -> u64 {
        defaults::MEMORY_LATENCY
    }

    fn default_t_cas() -> u64 {
        defaults::T_CAS
    }

    fn default_t_ras() -> u64 {
        defaults::T_RAS
    }

    fn default_t_pre() -> u64 {
        defaults::T_PRE
    }
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            controller: MemoryController::default(),
            latency: defaults::MEMORY_LATENCY,
            t_cas: defaults::T_CAS,
            t_ras: defaults::T_RAS,
            t_pre: defaults::T_PRE,
        }
    }
}

/// Transport configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Cycles between a message leaving an outbound queue and reaching its destination
    #[serde(default = "NetworkConfig::default_hop_latency")]
    pub hop_latency: u64,
}

impl NetworkConfig {
    fn default_hop_latency() -> u64 {
        defaults::HOP_LATENCY
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            hop_latency: defaults::HOP_LATENCY,
        }
    }
}
