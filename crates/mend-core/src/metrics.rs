//! In-process counters and the model-latency histogram, rendered in the
//! text exposition format by the read-only metrics endpoint.

use std::sync::atomic::{AtomicU64, Ordering};

const LATENCY_BUCKETS_MS: &[u64] = &[100, 250, 500, 1_000, 2_500, 5_000, 10_000, 30_000];

#[derive(Debug, Default)]
pub struct MetricsRegistry {
    pub failures_detected: Counter,
    pub remediations_opened: Counter,
    pub remediations_succeeded: Counter,
    pub rollbacks: Counter,
    pub llm_latency_ms: Histogram,
}

#[derive(Debug, Default)]
pub struct Counter(AtomicU64);

impl Counter {
    pub fn inc(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

#[derive(Debug)]
pub struct Histogram {
    bucket_counts: Vec<AtomicU64>,
    sum: AtomicU64,
    count: AtomicU64,
}

impl Default for Histogram {
    fn default() -> Self {
        Self {
            bucket_counts: LATENCY_BUCKETS_MS.iter().map(|_| AtomicU64::new(0)).collect(),
            sum: AtomicU64::new(0),
            count: AtomicU64::new(0),
        }
    }
}

impl Histogram {
    pub fn observe(&self, value_ms: u64) {
        for (i, bound) in LATENCY_BUCKETS_MS.iter().enumerate() {
            if value_ms <= *bound {
                self.bucket_counts[i].fetch_add(1, Ordering::Relaxed);
            }
        }
        self.sum.fetch_add(value_ms, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }
}

impl MetricsRegistry {
    /// Text exposition. Gauges that live in the store (open circuits,
    /// learned patterns) are passed in by the caller.
    pub fn render(&self, circuits_open: u64, patterns_total: u64) -> String {
        let mut out = String::new();

        let counters = [
            ("failures_detected_total", self.failures_detected.get()),
            ("remediations_opened_total", self.remediations_opened.get()),
            (
                "remediations_succeeded_total",
                self.remediations_succeeded.get(),
            ),
            ("rollbacks_total", self.rollbacks.get()),
        ];
        for (name, value) in counters {
            out.push_str(&format!("# TYPE {name} counter\n{name} {value}\n"));
        }

        out.push_str(&format!(
            "# TYPE circuits_open gauge\ncircuits_open {circuits_open}\n"
        ));
        out.push_str(&format!(
            "# TYPE patterns_total gauge\npatterns_total {patterns_total}\n"
        ));

        out.push_str("# TYPE llm_latency_ms histogram\n");
        for (i, bound) in LATENCY_BUCKETS_MS.iter().enumerate() {
            let count = self.llm_latency_ms.bucket_counts[i].load(Ordering::Relaxed);
            out.push_str(&format!("llm_latency_ms_bucket{{le=\"{bound}\"}} {count}\n"));
        }
        out.push_str(&format!(
            "llm_latency_ms_bucket{{le=\"+Inf\"}} {}\n",
            self.llm_latency_ms.count()
        ));
        out.push_str(&format!(
            "llm_latency_ms_sum {}\n",
            self.llm_latency_ms.sum.load(Ordering::Relaxed)
        ));
        out.push_str(&format!("llm_latency_ms_count {}\n", self.llm_latency_ms.count()));

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let registry = MetricsRegistry::default();
        registry.failures_detected.inc();
        registry.failures_detected.inc();
        registry.rollbacks.inc();
        assert_eq!(registry.failures_detected.get(), 2);
        assert_eq!(registry.rollbacks.get(), 1);
    }

    #[test]
    fn histogram_buckets_are_cumulative() {
        let registry = MetricsRegistry::default();
        registry.llm_latency_ms.observe(120);
        registry.llm_latency_ms.observe(900);
        registry.llm_latency_ms.observe(40_000);

        let text = registry.render(0, 0);
        assert!(text.contains("llm_latency_ms_bucket{le=\"250\"} 1"));
        assert!(text.contains("llm_latency_ms_bucket{le=\"1000\"} 2"));
        assert!(text.contains("llm_latency_ms_bucket{le=\"+Inf\"} 3"));
        assert!(text.contains("llm_latency_ms_count 3"));
    }

    #[test]
    fn render_includes_required_series() {
        let registry = MetricsRegistry::default();
        let text = registry.render(2, 17);
        for series in [
            "failures_detected_total",
            "remediations_opened_total",
            "remediations_succeeded_total",
            "rollbacks_total",
            "circuits_open 2",
            "patterns_total 17",
        ] {
            assert!(text.contains(series), "missing {series}");
        }
    }
}
