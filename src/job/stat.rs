//! Per-worker statistics: run counts, message volume, and the queue
//! high-water mark, emitted on a period when enabled.

use std::collections::HashMap;

use itertools::Itertools;
use log::info;

pub struct JobStat {
    enabled: bool,
    check_time_ms: u64,
    last_emit_ms: u64,

    run_count: HashMap<String, u64>,
    byte_count: HashMap<String, u64>,
    queue_high_water: usize,
}

impl JobStat {
    pub fn new(enabled: bool, check_time_ms: u64, now_ms: u64) -> Self {
        Self {
            enabled,
            check_time_ms,
            last_emit_ms: now_ms,
            run_count: HashMap::new(),
            byte_count: HashMap::new(),
            queue_high_water: 0,
        }
    }

    pub fn note_queue_len(&mut self, len: usize) {
        if len > self.queue_high_water {
            self.queue_high_water = len;
        }
    }

    /// Count one handler run. The current order can legitimately be
    /// absent (admin packets); counting is skipped then.
    pub fn record_run(&mut self, order: Option<&str>, value_bytes: usize) {
        if !self.enabled {
            return;
        }
        let order = match order {
            Some(order) => order,
            None => return,
        };
        *self.run_count.entry(order.to_string()).or_insert(0) += 1;
        *self.byte_count.entry(order.to_string()).or_insert(0) += value_bytes as u64;
    }

    /// Emit and reset when the period elapsed.
    pub fn maybe_emit(&mut self, job_id: u32, now_ms: u64) {
        if !self.enabled || now_ms < self.last_emit_ms + self.check_time_ms {
            return;
        }
        let passed = now_ms - self.last_emit_ms;
        self.last_emit_ms = now_ms;

        for order in self.run_count.keys().sorted() {
            info!(
                "job {} stat: order {} ran {} times ({} bytes) in {} ms, queue high water {}",
                job_id,
                order,
                self.run_count[order],
                self.byte_count.get(order).unwrap_or(&0),
                passed,
                self.queue_high_water,
            );
        }
        self.run_count.clear();
        self.byte_count.clear();
        self.queue_high_water = 0;
    }
}
