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

// icache.rs
//
// This file contains the timing-only L1 instruction cache model. It keeps a
// tag store (no data: instruction words always come from the MMU) and
// answers fetch-line probes with a hit flag and the cycle at which a miss
// resolves. Victim selection is LRU by default, with a random option.

use rand::Rng;
use serde::Serialize;

use crate::timing_simulator::config::{IcacheConfig, ReplacementPolicy};

#[derive(Debug, Clone, Copy, Default)]
struct IcacheLine {
    valid: bool,
    tag: u64,
    lru_cnt: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct IcacheStats {
    pub accesses: u64,
    pub hits: u64,
    pub misses: u64,
}

impl IcacheStats {
    pub fn hit_rate(&self) -> f64 {
        if self.accesses == 0 {
            0.0
        } else {
            self.hits as f64 / self.accesses as f64
        }
    }
}

pub struct InstructionCache {
    config: IcacheConfig,
    sets: Vec<Vec<IcacheLine>>,
    pub stats: IcacheStats,
}

impl InstructionCache {
    pub fn new(config: IcacheConfig) -> Self {
        let sets = (0..config.num_sets)
            .map(|_| {
                (0..config.associativity)
                    .map(|way| IcacheLine {
                        lru_cnt: way,
                        ..IcacheLine::default()
                    })
                    .collect()
            })
            .collect();
        Self {
            config,
            sets,
            stats: IcacheStats::default(),
        }
    }

    pub fn line_size_log2(&self) -> u32 {
        self.config.line_size_log2
    }

    pub fn interleaved(&self) -> bool {
        self.config.interleaved
    }

    pub fn perfect(&self) -> bool {
        self.config.perfect
    }

    /// Probe one line. Returns (hit, resolve_cycle): on a hit the resolve
    /// cycle is the probing cycle itself; on a miss the line is installed
    /// and becomes usable once the returned cycle is reached.
    pub fn access(&mut self, cycle: u64, line_addr: u64) -> (bool, u64) {
        if self.config.perfect {
            return (true, cycle);
        }

        self.stats.accesses += 1;
        let line_num = line_addr >> self.config.line_size_log2;
        let set_idx = (line_num % self.config.num_sets as u64) as usize;
        let tag = line_num / self.config.num_sets as u64;

        if let Some(way_idx) = self.sets[set_idx]
            .iter()
            .position(|line| line.valid && line.tag == tag)
        {
            self.stats.hits += 1;
            self.touch(set_idx, way_idx);
            return (true, cycle);
        }

        self.stats.misses += 1;
        let victim = match self.config.replacement_policy {
            ReplacementPolicy::LRU => self.sets[set_idx]
                .iter()
                .position(|line| line.lru_cnt == self.config.associativity - 1)
                .expect("LRU counters form a permutation"),
            ReplacementPolicy::Random => {
                rand::thread_rng().gen_range(0..self.config.associativity)
            },
        };
        self.sets[set_idx][victim].valid = true;
        self.sets[set_idx][victim].tag = tag;
        self.touch(set_idx, victim);

        (false, cycle + self.config.miss_penalty)
    }

    fn touch(&mut self, set_idx: usize, way_idx: usize) {
        let touched_cnt = self.sets[set_idx][way_idx].lru_cnt;
        for line in self.sets[set_idx].iter_mut() {
            if line.lru_cnt < touched_cnt {
                line.lru_cnt += 1;
            }
        }
        self.sets[set_idx][way_idx].lru_cnt = 0;
    }

    pub fn flush(&mut self) {
        for set in &mut self.sets {
            for (way_idx, line) in set.iter_mut().enumerate() {
                *line = IcacheLine {
                    lru_cnt: way_idx,
                    ..IcacheLine::default()
                };
            }
        }
    }
}
