// Copyright (c) 2024 Mudit Bhargava
//
// Permission is hereby granted, free of charge, to any person obtaining a copy
// of this software and associated documentation files (the "Software"), to deal
// in the Software without restriction, including without limitation the rights
// to use, copy, modify, merge, publish, distribute, sublicense, and/or sell
// copies of the Software, and to permit persons to whom the Software is
// furnished to do so, subject to the following conditions:
//
// The above copyright notice and this permission notice shall be included in all
// copies or substantial portions of the Software.
//
// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
// IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
// FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
// AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
// LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM,
// OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE
// SOFTWARE.
//

// config.rs
//
// This file contains the configuration structs for the timing simulator:
// the renamer geometry, the branch predictor tables, the trace cache, the
// L1 instruction cache model, and the top-level simulator knobs.

use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct RenamerConfig {
    pub n_log_regs: u64,
    pub n_phy_regs: u64,
    pub n_branches: u64,
    pub active_list_size: usize,
}

impl RenamerConfig {
    pub fn new(n_log_regs: u64, n_phy_regs: u64, n_branches: u64) -> Self {
        assert!(n_phy_regs > n_log_regs, "need more physical than logical registers");
        assert!(
            n_branches >= 1 && n_branches <= 64,
            "branch checkpoint count must be in [1, 64]"
        );
        Self {
            n_log_regs,
            n_phy_regs,
            n_branches,
            active_list_size: 256,
        }
    }

    pub fn with_active_list_size(mut self, size: usize) -> Self {
        assert!(size > 0, "active list size must be positive");
        self.active_list_size = size;
        self
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PredictorConfig {
    /// Pattern history table entries (power of two).
    pub pht_size: usize,
    /// Branch target buffer entries (power of two).
    pub btb_size: usize,
    /// Direct-mapped multi-prediction table rows (power of two).
    pub multi_pred_size: usize,
    /// Branch directions produced per compound lookup (k).
    pub num_multi_pred: usize,
    /// In-flight prediction (CTI queue) capacity.
    pub cti_queue_size: usize,
    /// Return address stack depth.
    pub ras_size: usize,
    /// Confidence counter ceiling.
    pub conf_max: u32,
    /// Reset-on-mispredict confidence counters.
    pub conf_reset: bool,
}

impl PredictorConfig {
    pub fn new() -> Self {
        Self {
            pht_size: 16384,
            btb_size: 4096,
            multi_pred_size: 16384,
            num_multi_pred: 3,
            cti_queue_size: 512,
            ras_size: 32,
            conf_max: 15,
            conf_reset: true,
        }
    }

    pub fn with_num_multi_pred(mut self, k: usize) -> Self {
        assert!(k >= 1 && k <= 16, "multi-prediction width must be in [1, 16]");
        self.num_multi_pred = k;
        self
    }

    pub fn with_pht_size(mut self, size: usize) -> Self {
        assert!(size.is_power_of_two(), "PHT size must be a power of two");
        self.pht_size = size;
        self
    }

    pub fn with_btb_size(mut self, size: usize) -> Self {
        assert!(size.is_power_of_two(), "BTB size must be a power of two");
        self.btb_size = size;
        self
    }

    pub fn with_cti_queue_size(mut self, size: usize) -> Self {
        assert!(size > 0, "CTI queue size must be positive");
        self.cti_queue_size = size;
        self
    }

    pub fn with_ras_size(mut self, size: usize) -> Self {
        assert!(size > 0, "RAS depth must be positive");
        self.ras_size = size;
        self
    }
}

impl Default for PredictorConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Heuristic deciding when a trace under construction is cut short.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TerminateHeuristic {
    /// Only the hard limits (M branches, N instructions) end a trace.
    None,
    /// Additionally end the trace at any backward conditional branch.
    BackwardBranch,
}

#[derive(Debug, Clone, Serialize)]
pub struct TraceCacheConfig {
    pub enabled: bool,
    /// Maximum branches embedded in one trace (M).
    pub max_branches: usize,
    /// Maximum instructions in one trace (N).
    pub max_insns: usize,
    /// Total trace entries (power of two).
    pub capacity: usize,
    /// Ways per set (power of two).
    pub associativity: usize,
    pub max_ongoing_fill: usize,
    pub non_blocking_fill: bool,
    /// XOR the prediction vector into the set index.
    pub index_with_pred_bits: bool,
    pub terminate_heuristic: TerminateHeuristic,
}

impl TraceCacheConfig {
    pub fn new(max_branches: usize, max_insns: usize, capacity: usize, associativity: usize) -> Self {
        assert!(capacity.is_power_of_two(), "trace capacity must be a power of two");
        assert!(
            associativity.is_power_of_two() && associativity <= capacity,
            "associativity must be a power of two no larger than capacity"
        );
        assert!(max_branches >= 1 && max_branches <= 16, "branches per trace must be in [1, 16]");
        assert!(max_insns >= max_branches, "a trace holds at least its branches");
        Self {
            enabled: true,
            max_branches,
            max_insns,
            capacity,
            associativity,
            max_ongoing_fill: 1,
            non_blocking_fill: false,
            index_with_pred_bits: false,
            terminate_heuristic: TerminateHeuristic::None,
        }
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_non_blocking_fill(mut self, enabled: bool, max_ongoing: usize) -> Self {
        assert!(max_ongoing >= 1, "at least one concurrent fill is required");
        self.non_blocking_fill = enabled;
        self.max_ongoing_fill = max_ongoing;
        self
    }

    pub fn with_index_with_pred_bits(mut self, enabled: bool) -> Self {
        self.index_with_pred_bits = enabled;
        self
    }

    pub fn with_terminate_heuristic(mut self, heuristic: TerminateHeuristic) -> Self {
        self.terminate_heuristic = heuristic;
        self
    }

    pub fn num_sets(&self) -> usize {
        self.capacity / self.associativity
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum ReplacementPolicy {
    LRU,
    Random,
}

#[derive(Debug, Clone, Serialize)]
pub struct IcacheConfig {
    /// Skip the miss model entirely.
    pub perfect: bool,
    /// log2 of the line size in bytes.
    pub line_size_log2: u32,
    pub num_sets: usize,
    pub associativity: usize,
    pub miss_penalty: u64,
    /// Model two interleaved banks so a fetch bundle may span a line pair.
    pub interleaved: bool,
    pub replacement_policy: ReplacementPolicy,
}

impl IcacheConfig {
    pub fn new(num_sets: usize, associativity: usize, line_size_log2: u32) -> Self {
        assert!(num_sets.is_power_of_two(), "I-cache set count must be a power of two");
        assert!(associativity > 0, "associativity must be positive");
        Self {
            perfect: false,
            line_size_log2,
            num_sets,
            associativity,
            miss_penalty: 10,
            interleaved: false,
            replacement_policy: ReplacementPolicy::LRU,
        }
    }

    pub fn perfect() -> Self {
        let mut config = Self::new(64, 4, 6);
        config.perfect = true;
        config
    }

    pub fn with_miss_penalty(mut self, penalty: u64) -> Self {
        self.miss_penalty = penalty;
        self
    }

    pub fn with_interleaved(mut self, enabled: bool) -> Self {
        self.interleaved = enabled;
        self
    }

    pub fn with_replacement_policy(mut self, policy: ReplacementPolicy) -> Self {
        self.replacement_policy = policy;
        self
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SimulatorConfig {
    pub memory_size: usize,
    pub fetch_width: usize,
    pub payload_buffer_size: usize,
    pub max_cycles: u64,
    /// Upper bound on the reference (oracle) run length.
    pub max_oracle_steps: usize,
    /// Completion latency of loads, in cycles after dispatch.
    pub load_latency: u64,
    /// Completion latency of everything else.
    pub alu_latency: u64,
    /// Cycle interval between statistics dumps (0 disables).
    pub stats_period: u64,
    pub renamer: RenamerConfig,
    pub predictor: PredictorConfig,
    pub trace_cache: TraceCacheConfig,
    pub icache: IcacheConfig,
}

impl SimulatorConfig {
    pub fn new(memory_size: usize) -> Self {
        Self {
            memory_size,
            fetch_width: 4,
            payload_buffer_size: 512,
            max_cycles: 1_000_000,
            max_oracle_steps: 1_000_000,
            load_latency: 3,
            alu_latency: 1,
            stats_period: 0,
            renamer: RenamerConfig::new(32, 128, 16),
            predictor: PredictorConfig::new(),
            trace_cache: TraceCacheConfig::new(3, 16, 64, 4),
            icache: IcacheConfig::new(64, 4, 6),
        }
    }

    pub fn with_fetch_width(mut self, width: usize) -> Self {
        assert!(width > 0, "fetch width must be positive");
        self.fetch_width = width;
        self
    }

    pub fn with_max_cycles(mut self, max_cycles: u64) -> Self {
        self.max_cycles = max_cycles;
        self
    }

    pub fn with_renamer(mut self, renamer: RenamerConfig) -> Self {
        self.renamer = renamer;
        self
    }

    pub fn with_predictor(mut self, predictor: PredictorConfig) -> Self {
        self.predictor = predictor;
        self
    }

    pub fn with_trace_cache(mut self, trace_cache: TraceCacheConfig) -> Self {
        self.trace_cache = trace_cache;
        self
    }

    pub fn with_icache(mut self, icache: IcacheConfig) -> Self {
        self.icache = icache;
        self
    }

    pub fn with_stats_period(mut self, period: u64) -> Self {
        self.stats_period = period;
        self
    }
}
