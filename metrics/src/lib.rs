pub mod tracer;

use std::{
    future::Future,
    pin::Pin,
    task::{Context, Poll},
    time::{Duration, Instant},
};

use anyhow::Result;
use opentelemetry::{
    metrics::{Counter, Histogram},
    KeyValue,
};
use opentelemetry_otlp::{MetricExporter, WithExportConfig};
use opentelemetry_sdk::{
    metrics::{PeriodicReader, SdkMeterProvider},
    Resource,
};
use pin_project_lite::pin_project;

pin_project! {
    #[must_use = "futures do nothing unless you `.await` or poll them"]
    pub struct TimedFuture<F, C>
    where
        F: Future,
        C: FnOnce(Duration),
    {
        #[pin]
        inner: F,
        start: Instant,
        callback: Option<C>, // taken on completion, the future may be polled again
    }
}

impl<F, C> TimedFuture<F, C>
where
    F: Future,
    C: FnOnce(Duration),
{
    pub fn new(inner: F, callback: C) -> Self {
        Self {
            inner,
            callback: Some(callback),
            start: Instant::now(),
        }
    }
}

impl<F, C> Future for TimedFuture<F, C>
where
    F: Future,
    C: FnOnce(Duration),
{
    type Output = F::Output;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        let poll_result = this.inner.poll(cx);

        if poll_result.is_ready() {
            let elapsed = this.start.elapsed();
            if let Some(callback) = this.callback.take() {
                callback(elapsed);
            }
        }

        poll_result
    }
}

pub fn create_timed_future<F, C>(future: F, callback: C) -> TimedFuture<F, C>
where
    F: Future,
    C: FnOnce(Duration),
{
    TimedFuture::new(future, callback)
}

pub trait TimerUpdate {
    fn add(&self, duration: Duration, labels: &[KeyValue]);
}

impl TimerUpdate for Counter<f64> {
    fn add(&self, duration: Duration, labels: &[KeyValue]) {
        self.add(duration.as_secs_f64(), labels);
    }
}

impl TimerUpdate for Histogram<f64> {
    fn add(&self, duration: Duration, labels: &[KeyValue]) {
        self.record(duration.as_secs_f64(), labels);
    }
}

/// Records the time between `start` and drop into `metric`.
pub struct Timer<'a, T: TimerUpdate + Sync> {
    start: Instant,
    metric: &'a T,
    labels: Vec<KeyValue>,
}

impl<'a, T: TimerUpdate + Sync> Timer<'a, T> {
    pub fn start(metric: &'a T) -> Self {
        Self::start_with_labels(metric, Vec::new())
    }

    pub fn start_with_labels(metric: &'a T, labels: Vec<KeyValue>) -> Self {
        Self {
            start: Instant::now(),
            metric,
            labels,
        }
    }
}

impl<T: TimerUpdate + Sync> Drop for Timer<'_, T> {
    fn drop(&mut self) {
        self.metric.add(self.start.elapsed(), &self.labels);
    }
}

/// Installs the global meter provider exporting over OTLP.
///
/// Meters created before this call keep using the no-op provider, so this
/// must run before any `Metrics::new`.
pub fn init_provider(
    endpoint: Option<&str>,
    interval: Duration,
    instance_id: &str,
) -> Result<()> {
    let resource = Resource::builder()
        .with_attribute(KeyValue::new("service.namespace", "netsync"))
        .with_attribute(KeyValue::new("service.name", "netsync-agent"))
        .with_attribute(KeyValue::new("service.version", env!("CARGO_PKG_VERSION")))
        .with_attribute(KeyValue::new(
            "netsync.instance.id",
            instance_id.to_string(),
        ))
        .build();

    let mut exporter_builder = MetricExporter::builder().with_tonic();
    if let Some(endpoint) = endpoint {
        exporter_builder = exporter_builder.with_endpoint(endpoint.to_string());
    }
    let exporter = exporter_builder.build()?;

    let reader = PeriodicReader::builder(exporter)
        .with_interval(interval)
        .build();

    let provider = SdkMeterProvider::builder()
        .with_resource(resource)
        .with_reader(reader)
        .build();

    opentelemetry::global::set_meter_provider(provider);

    tracing::info!(
        instance_id = instance_id,
        endpoint = ?endpoint,
        interval_secs = interval.as_secs(),
        "metrics provider initialized"
    );

    Ok(())
}

pub mod reconciler_stats {
    use opentelemetry::metrics::{Counter, Histogram};

    #[derive(Debug)]
    pub struct Metrics {
        /// Driver calls, labelled by `kind`, `op` and `outcome`.
        pub driver_operations: Counter<u64>,
        /// Driver call latencies, labelled by `kind` and `op`.
        pub driver_latency: Histogram<f64>,
        /// Finished batches, labelled by `mode`.
        pub batches: Counter<u64>,
        pub batch_latency: Histogram<f64>,
        /// Items rejected because a referenced name was not registered.
        pub missing_dependencies: Counter<u64>,
    }

    impl Default for Metrics {
        fn default() -> Self {
            Self::new()
        }
    }

    impl Metrics {
        pub fn new() -> Metrics {
            let meter = opentelemetry::global::meter("netsync-reconciler");
            let driver_operations = meter
                .u64_counter("netsync.reconciler.driver_operations")
                .with_description("number of resource driver calls")
                .build();
            let driver_latency = meter
                .f64_histogram("netsync.reconciler.driver_latency")
                .with_description("resource driver call latencies in seconds")
                .build();
            let batches = meter
                .u64_counter("netsync.reconciler.batches")
                .with_description("number of reconciled batches")
                .build();
            let batch_latency = meter
                .f64_histogram("netsync.reconciler.batch_latency")
                .with_description("batch reconciliation latencies in seconds")
                .build();
            let missing_dependencies = meter
                .u64_counter("netsync.reconciler.missing_dependencies")
                .with_description("number of items referencing unregistered names")
                .build();
            Metrics {
                driver_operations,
                driver_latency,
                batches,
                batch_latency,
                missing_dependencies,
            }
        }
    }
}

pub mod api_stats {
    use opentelemetry::metrics::{Counter, Histogram};

    #[derive(Debug)]
    pub struct Metrics {
        /// Configurator calls, labelled by `operation`.
        pub requests: Counter<u64>,
        pub request_latency: Histogram<f64>,
    }

    impl Default for Metrics {
        fn default() -> Self {
            Self::new()
        }
    }

    impl Metrics {
        pub fn new() -> Metrics {
            let meter = opentelemetry::global::meter("netsync-api");
            let requests = meter
                .u64_counter("netsync.api.requests")
                .with_description("number of configurator requests")
                .build();
            let request_latency = meter
                .f64_histogram("netsync.api.request_latency")
                .with_description("configurator request latencies in seconds")
                .build();
            Metrics {
                requests,
                request_latency,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;

    #[tokio::test]
    async fn test_timed_future_reports_once() {
        let observed = Arc::new(Mutex::new(Vec::new()));
        let sink = observed.clone();
        let value = create_timed_future(async { 42 }, move |elapsed| {
            sink.lock().unwrap().push(elapsed);
        })
        .await;
        assert_eq!(value, 42);
        assert_eq!(observed.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_timer_records_on_drop() {
        struct Recorder(Mutex<Vec<(Duration, usize)>>);
        impl TimerUpdate for Recorder {
            fn add(&self, duration: Duration, labels: &[KeyValue]) {
                self.0.lock().unwrap().push((duration, labels.len()));
            }
        }

        let recorder = Recorder(Mutex::new(Vec::new()));
        {
            let _timer = Timer::start_with_labels(&recorder, vec![KeyValue::new("mode", "resync")]);
        }
        let recorded = recorder.0.lock().unwrap();
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].1, 1);
    }

    #[test]
    fn test_metrics_build_on_noop_provider() {
        let stats = reconciler_stats::Metrics::new();
        stats
            .driver_operations
            .add(1, &[KeyValue::new("kind", "vpp_route")]);
        let _api = api_stats::Metrics::default();
    }
}
