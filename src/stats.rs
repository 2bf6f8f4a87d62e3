//! Per-channel simulation statistics.
//!
//! Three families of stats, all registered at construction:
//! - plain counters (commands issued, transactions done, cycles)
//! - per-rank vector counters (idle/active/self-refresh cycle breakdown)
//! - histograms (latency distributions with fixed-width bins)
//!
//! Counters accumulate in two layers: the current epoch and the running
//! total. [`SimpleStats::epoch_json`] emits and resets the epoch layer;
//! [`SimpleStats::final_json`] folds any partial epoch in and emits the
//! totals.

use std::collections::HashMap;

use serde_json::{json, Map, Value};

/// Fixed-bin histogram with a running sum for averages.
#[derive(Debug, Clone)]
pub struct Histogram {
    start: u64,
    bin_width: u64,
    bins: Vec<u64>,
    sum: u64,
    count: u64,
}

impl Histogram {
    fn new(start: u64, end: u64, num_bins: usize) -> Self {
        let span = end.saturating_sub(start).max(1);
        Self {
            start,
            bin_width: (span / num_bins as u64).max(1),
            bins: vec![0; num_bins],
            sum: 0,
            count: 0,
        }
    }

    fn record(&mut self, value: u64) {
        let bin = ((value.saturating_sub(self.start)) / self.bin_width) as usize;
        let bin = bin.min(self.bins.len() - 1);
        self.bins[bin] += 1;
        self.sum += value;
        self.count += 1;
    }

    fn merge(&mut self, other: &Histogram) {
        for (a, b) in self.bins.iter_mut().zip(&other.bins) {
            *a += b;
        }
        self.sum += other.sum;
        self.count += other.count;
    }

    fn clear(&mut self) {
        self.bins.iter_mut().for_each(|b| *b = 0);
        self.sum = 0;
        self.count = 0;
    }

    /// Mean of recorded values, 0.0 when empty.
    pub fn average(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum as f64 / self.count as f64
        }
    }

    fn to_json(&self) -> Value {
        let mut bins = Map::new();
        for (i, count) in self.bins.iter().enumerate() {
            let lo = self.start + i as u64 * self.bin_width;
            let hi = lo + self.bin_width - 1;
            bins.insert(format!("[{}-{}]", lo, hi), json!(count));
        }
        json!({ "average": self.average(), "count": self.count, "bins": bins })
    }
}

/// Counter registry for one channel.
pub struct SimpleStats {
    channel_id: usize,
    counter_names: Vec<&'static str>,
    counters: HashMap<&'static str, u64>,
    epoch_counters: HashMap<&'static str, u64>,
    vec_names: Vec<&'static str>,
    vec_counters: HashMap<&'static str, Vec<u64>>,
    epoch_vec_counters: HashMap<&'static str, Vec<u64>>,
    histo_names: Vec<&'static str>,
    histos: HashMap<&'static str, Histogram>,
    epoch_histos: HashMap<&'static str, Histogram>,
}

const COUNTERS: &[&str] = &[
    "num_cycles",
    "epoch_num",
    "num_reads_done",
    "num_writes_done",
    "num_read_cmds",
    "num_write_cmds",
    "num_read_row_hits",
    "num_write_row_hits",
    "num_act_cmds",
    "num_pre_cmds",
    "num_ondemand_pres",
    "num_ref_cmds",
    "num_refb_cmds",
    "num_srefe_cmds",
    "num_srefx_cmds",
    "hbm_dual_cmds",
];

const VEC_COUNTERS: &[&str] = &["all_bank_idle_cycles", "rank_active_cycles", "sref_cycles"];

const HISTOS: &[(&str, u64, u64, usize)] = &[
    ("read_latency", 0, 200, 10),
    ("write_latency", 0, 300, 10),
    ("interarrival_latency", 0, 100, 10),
];

impl SimpleStats {
    /// Create the registry for one channel with `ranks` vector lanes.
    pub fn new(channel_id: usize, ranks: usize) -> Self {
        let mut stats = Self {
            channel_id,
            counter_names: COUNTERS.to_vec(),
            counters: HashMap::new(),
            epoch_counters: HashMap::new(),
            vec_names: VEC_COUNTERS.to_vec(),
            vec_counters: HashMap::new(),
            epoch_vec_counters: HashMap::new(),
            histo_names: HISTOS.iter().map(|(n, _, _, _)| *n).collect(),
            histos: HashMap::new(),
            epoch_histos: HashMap::new(),
        };
        for name in COUNTERS {
            stats.counters.insert(name, 0);
            stats.epoch_counters.insert(name, 0);
        }
        for name in VEC_COUNTERS {
            stats.vec_counters.insert(name, vec![0; ranks]);
            stats.epoch_vec_counters.insert(name, vec![0; ranks]);
        }
        for (name, start, end, bins) in HISTOS {
            stats.histos.insert(name, Histogram::new(*start, *end, *bins));
            stats.epoch_histos.insert(name, Histogram::new(*start, *end, *bins));
        }
        stats
    }

    /// Bump a counter by one.
    pub fn increment(&mut self, name: &'static str) {
        *self.epoch_counters.get_mut(name).expect("unregistered counter") += 1;
    }

    /// Bump one lane of a vector counter.
    pub fn increment_vec(&mut self, name: &'static str, pos: usize) {
        self.epoch_vec_counters.get_mut(name).expect("unregistered vec counter")[pos] += 1;
    }

    /// Record a histogram sample.
    pub fn add_value(&mut self, name: &'static str, value: u64) {
        self.epoch_histos
            .get_mut(name)
            .expect("unregistered histogram")
            .record(value);
    }

    /// Running total of a counter (epoch layer included).
    pub fn counter(&self, name: &'static str) -> u64 {
        self.counters[name] + self.epoch_counters[name]
    }

    fn fold_epoch(&mut self) {
        for name in &self.counter_names {
            let v = std::mem::take(self.epoch_counters.get_mut(name).expect("registered"));
            *self.counters.get_mut(name).expect("registered") += v;
        }
        for name in &self.vec_names {
            let epoch = self.epoch_vec_counters.get_mut(name).expect("registered");
            let total = self.vec_counters.get_mut(name).expect("registered");
            for (t, e) in total.iter_mut().zip(epoch.iter_mut()) {
                *t += std::mem::take(e);
            }
        }
        for name in &self.histo_names {
            let epoch = self.epoch_histos.get_mut(name).expect("registered");
            self.histos.get_mut(name).expect("registered").merge(epoch);
            epoch.clear();
        }
    }

    /// Emit this epoch's stats as one JSON object and reset the epoch
    /// layer (folding it into the running totals).
    pub fn epoch_json(&mut self, clk: u64) -> Value {
        self.increment("epoch_num");
        let object = self.layer_json(
            clk,
            &self.epoch_counters,
            &self.epoch_vec_counters,
            &self.epoch_histos,
        );
        self.fold_epoch();
        object
    }

    /// Emit the whole-run stats as one JSON object.
    pub fn final_json(&mut self, clk: u64) -> Value {
        self.fold_epoch();
        self.layer_json(clk, &self.counters, &self.vec_counters, &self.histos)
    }

    fn layer_json(
        &self,
        clk: u64,
        counters: &HashMap<&'static str, u64>,
        vecs: &HashMap<&'static str, Vec<u64>>,
        histos: &HashMap<&'static str, Histogram>,
    ) -> Value {
        let mut object = Map::new();
        object.insert("channel".to_string(), json!(self.channel_id));
        object.insert("clk".to_string(), json!(clk));
        for name in &self.counter_names {
            object.insert(name.to_string(), json!(counters[name]));
        }
        for name in &self.vec_names {
            for (i, v) in vecs[name].iter().enumerate() {
                object.insert(format!("{}.{}", name, i), json!(v));
            }
        }
        for name in &self.histo_names {
            object.insert(name.to_string(), histos[name].to_json());
        }
        Value::Object(object)
    }

    /// Clear everything (between simulation phases).
    pub fn reset(&mut self) {
        for v in self.counters.values_mut().chain(self.epoch_counters.values_mut()) {
            *v = 0;
        }
        for v in self
            .vec_counters
            .values_mut()
            .chain(self.epoch_vec_counters.values_mut())
        {
            v.iter_mut().for_each(|x| *x = 0);
        }
        for h in self.histos.values_mut().chain(self.epoch_histos.values_mut()) {
            h.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate_across_epochs() {
        let mut stats = SimpleStats::new(0, 2);
        stats.increment("num_read_cmds");
        stats.increment("num_read_cmds");
        assert_eq!(stats.counter("num_read_cmds"), 2);

        let epoch = stats.epoch_json(100);
        assert_eq!(epoch["num_read_cmds"], 2);
        assert_eq!(epoch["channel"], 0);

        stats.increment("num_read_cmds");
        let epoch = stats.epoch_json(200);
        assert_eq!(epoch["num_read_cmds"], 1);

        let total = stats.final_json(200);
        assert_eq!(total["num_read_cmds"], 3);
        assert_eq!(total["epoch_num"], 2);
    }

    #[test]
    fn test_vec_counters_have_rank_lanes() {
        let mut stats = SimpleStats::new(1, 2);
        stats.increment_vec("sref_cycles", 1);
        stats.increment_vec("sref_cycles", 1);
        stats.increment_vec("rank_active_cycles", 0);
        let total = stats.final_json(10);
        assert_eq!(total["sref_cycles.0"], 0);
        assert_eq!(total["sref_cycles.1"], 2);
        assert_eq!(total["rank_active_cycles.0"], 1);
    }

    #[test]
    fn test_histogram_average_and_bins() {
        let mut histo = Histogram::new(0, 200, 10);
        histo.record(5);
        histo.record(15);
        histo.record(25);
        histo.record(1000); // clamps into last bin
        assert_eq!(histo.average(), (5 + 15 + 25 + 1000) as f64 / 4.0);
        let json = histo.to_json();
        assert_eq!(json["bins"]["[0-19]"], 2);
        assert_eq!(json["bins"]["[20-39]"], 1);
        assert_eq!(json["bins"]["[180-199]"], 1);
    }

    #[test]
    fn test_reset_clears_all_layers() {
        let mut stats = SimpleStats::new(0, 1);
        stats.increment("num_cycles");
        stats.add_value("read_latency", 42);
        stats.epoch_json(1);
        stats.increment("num_cycles");
        stats.reset();
        assert_eq!(stats.counter("num_cycles"), 0);
        let total = stats.final_json(0);
        assert_eq!(total["read_latency"]["count"], 0);
    }
}
