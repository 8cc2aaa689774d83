//! Coherence statistics collection and reporting.
//!
//! This module tracks protocol activity for the simulator. It provides:
//! 1. **Directory counters:** Requests, responses, grants, probes, rejections, recalls, and memory traffic.
//! 2. **Node counters:** Local hits and misses, wire requests, forwards served, and retries.
//! 3. **Report:** A `SimStats` snapshot printable as text or serialisable as JSON.

use std::time::Instant;

use serde::Serialize;

/// Counters kept by the directory engine.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct DirectoryStats {
    /// Requests popped from the request queue or drained from the active table.
    pub requests: u64,
    /// Responses popped from the response queue.
    pub responses: u64,
    /// `Data` grants sent.
    pub grants_exclusive: u64,
    /// `DataS` grants sent.
    pub grants_shared: u64,
    /// `PutAck` replies sent.
    pub put_acks: u64,
    /// `FwdGetS` probes sent.
    pub forwards: u64,
    /// `Inv` probes sent.
    pub invalidations: u64,
    /// Probes resent after a `NackC`.
    pub probe_retries: u64,
    /// `NackB` rejections issued by the engine itself.
    pub nacks: u64,
    /// Capacity recalls started.
    pub recalls: u64,
    /// Drained transactions deferred because their victim was busy.
    pub deferrals: u64,
    /// Transactions admitted to the active table.
    pub admitted: u64,
    /// Responses discarded because nothing was waiting on them.
    pub dropped: u64,
    /// Backing store reads issued.
    pub memory_reads: u64,
    /// Backing store writes issued.
    pub memory_writes: u64,
    /// Cycles spent outside `Idle`.
    pub busy_cycles: u64,
}

/// Counters kept by one cache node.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct NodeStats {
    /// Local loads served without the wire.
    pub load_hits: u64,
    /// Local stores served without the wire.
    pub store_hits: u64,
    /// Local requests sent to the directory.
    pub wire_requests: u64,
    /// Requests resent after a `NackB`.
    pub retries: u64,
    /// Fills received (`Data` or `DataS`).
    pub fills: u64,
    /// Forwards (`FwdGetS`) served.
    pub forwards: u64,
    /// Invalidations (`Inv`) served.
    pub invalidations: u64,
    /// Probes answered with `NackD`.
    pub absent: u64,
    /// Dirty data returned with `RespPutM`.
    pub dirty_responses: u64,
    /// Forwards delayed behind a staged local request to the same block.
    pub backoffs: u64,
    /// Lines displaced by an install.
    pub evictions: u64,
}

/// Aggregated statistics for one simulation run.
#[derive(Clone, Debug, Serialize)]
pub struct SimStats {
    #[serde(skip)]
    start_time: Instant,
    /// Total simulated cycles.
    pub cycles: u64,
    /// Messages carried by the transport.
    pub messages: u64,
    /// Messages the transport had to hold back because a response queue was full.
    pub stalls: u64,
    /// Directory counters.
    pub directory: DirectoryStats,
    /// Per-node counters, indexed by node id minus one.
    pub nodes: Vec<NodeStats>,
}

impl Default for SimStats {
    fn default() -> Self {
        Self::since(Instant::now())
    }
}

impl SimStats {
    /// Empty statistics whose host time is measured from `start_time`.
    pub fn since(start_time: Instant) -> Self {
        Self {
            start_time,
            cycles: 0,
            messages: 0,
            stalls: 0,
            directory: DirectoryStats::default(),
            nodes: Vec::new(),
        }
    }

    /// Sum of every node's counters.
    pub fn node_totals(&self) -> NodeStats {
        self.nodes.iter().fold(NodeStats::default(), |mut acc, n| {
            acc.load_hits += n.load_hits;
            acc.store_hits += n.store_hits;
            acc.wire_requests += n.wire_requests;
            acc.retries += n.retries;
            acc.fills += n.fills;
            acc.forwards += n.forwards;
            acc.invalidations += n.invalidations;
            acc.absent += n.absent;
            acc.dirty_responses += n.dirty_responses;
            acc.backoffs += n.backoffs;
            acc.evictions += n.evictions;
            acc
        })
    }

    /// Prints the named report sections; an empty list prints all of them.
    ///
    /// Known sections are `summary`, `directory`, and `nodes`.
    pub fn print_sections(&self, sections: &[String]) {
        let want = |s: &str| sections.is_empty() || sections.iter().any(|x| x == s);
        let seconds = self.start_time.elapsed().as_secs_f64();

        if want("summary") {
            let khz = if seconds > 0.0 {
                (self.cycles as f64 / seconds) / 1000.0
            } else {
                0.0
            };
            println!("\n==========================================================");
            println!("COHERENCE SIMULATION STATISTICS");
            println!("==========================================================");
            println!("host_seconds             {seconds:.4} s");
            println!("sim_cycles               {}", self.cycles);
            println!("sim_freq                 {khz:.2} kHz");
            println!("net.messages             {}", self.messages);
            println!("net.stalls               {}", self.stalls);
            println!("----------------------------------------------------------");
        }
        if want("directory") {
            let d = &self.directory;
            let busy = if self.cycles == 0 {
                0.0
            } else {
                (d.busy_cycles as f64 / self.cycles as f64) * 100.0
            };
            println!("DIRECTORY");
            println!("  dir.requests           {}", d.requests);
            println!("  dir.responses          {}", d.responses);
            println!("  dir.grants.data        {}", d.grants_exclusive);
            println!("  dir.grants.datas       {}", d.grants_shared);
            println!("  dir.put_acks           {}", d.put_acks);
            println!("  dir.forwards           {}", d.forwards);
            println!("  dir.invalidations      {}", d.invalidations);
            println!("  dir.probe_retries      {}", d.probe_retries);
            println!("  dir.nacks              {}", d.nacks);
            println!("  dir.recalls            {}", d.recalls);
            println!("  dir.deferrals          {}", d.deferrals);
            println!("  dir.admitted           {}", d.admitted);
            println!("  dir.dropped            {}", d.dropped);
            println!("  mem.reads              {}", d.memory_reads);
            println!("  mem.writes             {}", d.memory_writes);
            println!("  dir.busy               {} ({busy:.2}%)", d.busy_cycles);
            println!("----------------------------------------------------------");
        }
        if want("nodes") {
            println!("NODES");
            println!(
                "  {:<6} {:>8} {:>8} {:>8} {:>8} {:>8} {:>8} {:>8}",
                "node", "ld.hit", "st.hit", "wire", "retry", "fwd", "inv", "evict"
            );
            for (i, n) in self.nodes.iter().enumerate() {
                println!(
                    "  n{:<5} {:>8} {:>8} {:>8} {:>8} {:>8} {:>8} {:>8}",
                    i + 1,
                    n.load_hits,
                    n.store_hits,
                    n.wire_requests,
                    n.retries,
                    n.forwards,
                    n.invalidations,
                    n.evictions
                );
            }
        }
        println!("==========================================================");
    }

    /// Prints every report section.
    pub fn print(&self) {
        self.print_sections(&[]);
    }
}
