use opentelemetry::{
    global,
    metrics::{Counter, Histogram, MeterProvider},
    KeyValue,
};
use prometheus::Registry;

pub struct Metrics {
    request_counter: Counter<u64>,
    prediction_duration: Histogram<u64>,
    prediction_errors: Counter<u64>,
    pub registry: Registry,
}

impl Metrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();
        let exporter = opentelemetry_prometheus::exporter()
            .with_registry(registry.clone())
            .build()
            .map_err(|e| anyhow::anyhow!("failed to build prometheus exporter: {}", e))?;

        let provider = opentelemetry_sdk::metrics::SdkMeterProvider::builder()
            .with_reader(exporter)
            .build();

        let meter = provider.meter("image_classifier");
        global::set_meter_provider(provider);

        let request_counter = meter
            .u64_counter("requests_total")
            .with_description("Total number of requests")
            .build();

        let prediction_duration = meter
            .u64_histogram("prediction_duration_ms")
            .with_boundaries(exponential_boundaries(5.0, 1.5, 20))
            .with_description("Duration of fetch and inference in milliseconds")
            .build();

        let prediction_errors = meter
            .u64_counter("prediction_errors_total")
            .with_description("Failed predictions by error kind")
            .build();

        Ok(Metrics {
            request_counter,
            prediction_duration,
            prediction_errors,
            registry,
        })
    }

    pub fn record_request(&self, route: &str) {
        let attributes = vec![KeyValue::new("route", route.to_string())];
        self.request_counter.add(1, &attributes);
    }

    pub fn record_prediction_duration(&self, duration_ms: u64, route: &str) {
        let attributes = vec![KeyValue::new("route", route.to_string())];
        self.prediction_duration.record(duration_ms, &attributes);
    }

    pub fn record_prediction_error(&self, kind: &'static str) {
        let attributes = vec![KeyValue::new("kind", kind)];
        self.prediction_errors.add(1, &attributes);
    }
}

/// Histogram bucket bounds growing geometrically, rounded to whole milliseconds.
fn exponential_boundaries(start: f64, factor: f64, count: usize) -> Vec<f64> {
    let mut boundaries: Vec<f64> = std::iter::successors(Some(start), |b| Some(b * factor))
        .take(count)
        .map(f64::round)
        .collect();
    boundaries.dedup();
    boundaries
}
