use std::sync::{Arc, OnceLock};

use prometheus::{
    Counter, CounterVec, Encoder, Gauge, Histogram, HistogramOpts, Opts, Registry, TextEncoder,
};

/// Why a job execution context was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    Explicit,
    Reaped,
}

impl CloseReason {
    fn as_label(self) -> &'static str {
        match self {
            CloseReason::Explicit => "explicit",
            CloseReason::Reaped => "reaped",
        }
    }
}

#[derive(Clone, Debug)]
pub struct MetricsRegistry {
    inner: Arc<MetricsInner>,
}

#[derive(Debug)]
struct MetricsInner {
    registry: Registry,
    jobs_active: Gauge,
    jobs_created: Counter,
    jobs_closed: CounterVec,
    page_downstream_registered: Counter,
    page_downstream_duplicate: Counter,
    page_downstream_lookups: CounterVec,
    reaper_sweep_seconds: Histogram,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MetricsInner::new()),
        }
    }

    pub fn job_created(&self) {
        self.inner.jobs_created.inc();
        self.inner.jobs_active.inc();
    }

    pub fn job_closed(&self, reason: CloseReason) {
        self.inner
            .jobs_closed
            .with_label_values(&[reason.as_label()])
            .inc();
        self.inner.jobs_active.dec();
    }

    pub fn page_downstream_registered(&self) {
        self.inner.page_downstream_registered.inc();
    }

    pub fn page_downstream_duplicate(&self) {
        self.inner.page_downstream_duplicate.inc();
    }

    /// Count a page downstream lookup; `ready` is false when a pending future was handed out.
    pub fn page_downstream_lookup(&self, ready: bool) {
        let path = if ready { "ready" } else { "pending" };
        self.inner
            .page_downstream_lookups
            .with_label_values(&[path])
            .inc();
    }

    pub fn observe_reaper_sweep(&self, secs: f64) {
        self.inner.reaper_sweep_seconds.observe(secs.max(0.0));
    }

    pub fn render_prometheus(&self) -> String {
        let metric_families = self.inner.registry.gather();
        let mut out = Vec::new();
        let enc = TextEncoder::new();
        if enc.encode(&metric_families, &mut out).is_err() {
            return String::new();
        }
        String::from_utf8_lossy(&out).to_string()
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsInner {
    fn new() -> Self {
        let registry = Registry::new();

        let jobs_active = gauge(
            &registry,
            "dqe_jobs_active",
            "Job execution contexts currently open on this node",
        );
        let jobs_created = counter(
            &registry,
            "dqe_jobs_created_total",
            "Job execution contexts created",
        );
        let jobs_closed = counter_vec(
            &registry,
            "dqe_jobs_closed_total",
            "Job execution contexts closed",
            &["reason"],
        );

        let page_downstream_registered = counter(
            &registry,
            "dqe_page_downstream_registered_total",
            "Page downstream contexts registered",
        );
        let page_downstream_duplicate = counter(
            &registry,
            "dqe_page_downstream_duplicate_total",
            "Rejected duplicate page downstream registrations",
        );
        let page_downstream_lookups = counter_vec(
            &registry,
            "dqe_page_downstream_lookups_total",
            "Page downstream lookups by resolution path",
            &["path"],
        );

        let reaper_sweep_seconds = histogram(
            &registry,
            "dqe_reaper_sweep_seconds",
            "Time spent in one idle-job reaper sweep",
        );

        Self {
            registry,
            jobs_active,
            jobs_created,
            jobs_closed,
            page_downstream_registered,
            page_downstream_duplicate,
            page_downstream_lookups,
            reaper_sweep_seconds,
        }
    }
}

fn counter(registry: &Registry, name: &str, help: &str) -> Counter {
    let c = Counter::with_opts(Opts::new(name, help)).expect("counter");
    registry
        .register(Box::new(c.clone()))
        .expect("register counter");
    c
}

fn counter_vec(registry: &Registry, name: &str, help: &str, labels: &[&str]) -> CounterVec {
    let c = CounterVec::new(Opts::new(name, help), labels).expect("counter vec");
    registry
        .register(Box::new(c.clone()))
        .expect("register counter");
    c
}

fn gauge(registry: &Registry, name: &str, help: &str) -> Gauge {
    let g = Gauge::with_opts(Opts::new(name, help)).expect("gauge");
    registry
        .register(Box::new(g.clone()))
        .expect("register gauge");
    g
}

fn histogram(registry: &Registry, name: &str, help: &str) -> Histogram {
    let h = Histogram::with_opts(HistogramOpts::new(name, help)).expect("histogram");
    registry
        .register(Box::new(h.clone()))
        .expect("register histogram");
    h
}

static GLOBAL_METRICS: OnceLock<MetricsRegistry> = OnceLock::new();

pub fn global_metrics() -> &'static MetricsRegistry {
    GLOBAL_METRICS.get_or_init(MetricsRegistry::new)
}
