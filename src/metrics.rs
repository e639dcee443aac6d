//! Statement and connection metrics, plus tracing span helpers.
//!
//! With the `metrics` feature a process-wide [`METRICS`] instance records
//! through an OpenTelemetry meter exported into a Prometheus registry. With
//! the `tracing` feature [`tracing_helpers`] builds the spans wrapped around
//! prepare, execute and connect.

#[cfg(feature = "metrics")]
pub use self::prometheus_metrics::{ConnectorMetrics, METRICS};

#[cfg(feature = "metrics")]
mod prometheus_metrics {
    use once_cell::sync::Lazy;
    use opentelemetry::metrics::{Counter, Histogram, Meter, MeterProvider};
    use opentelemetry::global;
    use opentelemetry_sdk::metrics::SdkMeterProvider;
    use prometheus::{Encoder, Registry, TextEncoder};
    use std::time::Duration;

    pub static METRICS: Lazy<ConnectorMetrics> = Lazy::new(ConnectorMetrics::init);

    const METER_NAME: &str = "dbs_connector";

    pub struct ConnectorMetrics {
        pub registry: Registry,
        _provider: Option<SdkMeterProvider>,
        pub statements_total: Counter<u64>,
        pub statement_errors_total: Counter<u64>,
        pub statement_duration: Histogram<f64>,
        pub connection_attempts_total: Counter<u64>,
        pub connection_failures_total: Counter<u64>,
    }

    impl ConnectorMetrics {
        pub fn init() -> Self {
            let registry = Registry::new();
            let (provider, meter) = match opentelemetry_prometheus::exporter()
                .with_registry(registry.clone())
                .build()
            {
                Ok(exporter) => {
                    let provider = SdkMeterProvider::builder().with_reader(exporter).build();
                    let meter = provider.meter(METER_NAME);
                    (Some(provider), meter)
                }
                Err(err) => {
                    log::warn!("prometheus exporter unavailable, metrics are not exported: {err}");
                    (None, global::meter(METER_NAME))
                }
            };
            Self::with_meter(registry, provider, &meter)
        }

        fn with_meter(registry: Registry, provider: Option<SdkMeterProvider>, meter: &Meter) -> Self {
            let statements_total = meter
                .u64_counter("dbs_statements")
                .with_description("Statements executed")
                .build();
            let statement_errors_total = meter
                .u64_counter("dbs_statement_errors")
                .with_description("Statements that failed in the driver")
                .build();
            let statement_duration = meter
                .f64_histogram("dbs_statement_duration_seconds")
                .with_description("Driver time per statement")
                .build();
            let connection_attempts_total = meter
                .u64_counter("dbs_connection_attempts")
                .with_description("Connection attempts, retries included")
                .build();
            let connection_failures_total = meter
                .u64_counter("dbs_connection_failures")
                .with_description("Connection acquisitions that gave up")
                .build();

            Self {
                registry,
                _provider: provider,
                statements_total,
                statement_errors_total,
                statement_duration,
                connection_attempts_total,
                connection_failures_total,
            }
        }

        pub fn record_statement(&self, elapsed: Duration) {
            self.statements_total.add(1, &[]);
            self.statement_duration.record(elapsed.as_secs_f64(), &[]);
        }

        pub fn record_statement_error(&self) {
            self.statement_errors_total.add(1, &[]);
        }

        pub fn record_connection_attempt(&self) {
            self.connection_attempts_total.add(1, &[]);
        }

        pub fn record_connection_failure(&self) {
            self.connection_failures_total.add(1, &[]);
        }

        /// Prometheus text exposition of everything recorded so far.
        pub fn render(&self) -> String {
            let mut buffer = Vec::new();
            if let Err(err) = TextEncoder::new().encode(&self.registry.gather(), &mut buffer) {
                log::warn!("failed to encode metrics: {err}");
            }
            String::from_utf8(buffer).unwrap_or_default()
        }
    }

}

#[cfg(feature = "tracing")]
pub mod tracing_helpers {
    use tracing::Span;

    /// Span around rendering and preparing one statement.
    pub fn prepare_statement_span(operation: &str) -> Span {
        tracing::info_span!("dbs.prepare", operation = operation)
    }

    /// Span around binding and executing one statement.
    pub fn execute_statement_span(sql: &str) -> Span {
        tracing::info_span!("dbs.execute", db.statement = sql)
    }

    pub fn acquire_connection_span() -> Span {
        tracing::info_span!("dbs.connect")
    }

}
