use crate::config::{LogFormat, TelemetryConfig};
use metrics::{describe_counter, describe_gauge, describe_histogram, Unit};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

pub fn init(config: &TelemetryConfig) -> anyhow::Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let fmt_layer = match config.log_format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .boxed(),
        LogFormat::Pretty => fmt::layer().with_target(true).boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();

    if config.metrics_enabled {
        let addr: SocketAddr = ([0, 0, 0, 0], config.metrics_port).into();
        PrometheusBuilder::new().with_http_listener(addr).install()?;
        describe_metrics();

        tracing::info!(
            port = config.metrics_port,
            "Metrics endpoint started at http://0.0.0.0:{}/metrics",
            config.metrics_port
        );
    }

    Ok(())
}

fn describe_metrics() {
    describe_counter!("adapter_runs_total", "Adapter runs by source and outcome");
    describe_counter!("records_fetched_total", "Raw records returned by adapters");
    describe_counter!("records_skipped_total", "Raw records dropped during normalization");
    describe_counter!("items_upserted_total", "Canonical items inserted or updated");
    describe_counter!("items_swept_total", "Live items reclassified as Ended");
    describe_histogram!("adapter_run_duration_seconds", Unit::Seconds, "Adapter run latency");
    describe_counter!("job_executions_total", "Scheduled job executions by outcome");
    describe_counter!("job_ticks_coalesced_total", "Ticks skipped because the job was still running");
    describe_counter!("job_ticks_misfired_total", "Ticks skipped because they started past the grace period");
    describe_gauge!("scheduler_jobs", "Registered scheduler jobs");
    describe_counter!("login_attempts_total", "Automated logins by site and outcome");
    describe_counter!("bid_outcomes_total", "Bid submissions by site and outcome");
    describe_gauge!("browser_contexts", "Open authenticated browser contexts");
}

pub fn shutdown() {
    tracing::info!("Shutting down telemetry");
}

#[macro_export]
macro_rules! record_metric {
    (counter, $name:expr, $value:expr $(, $label:tt = $label_value:expr)*) => {
        metrics::counter!($name $(, $label => $label_value)*).increment($value);
    };
    (gauge, $name:expr, $value:expr $(, $label:tt = $label_value:expr)*) => {
        metrics::gauge!($name $(, $label => $label_value)*).set($value as f64);
    };
    (histogram, $name:expr, $value:expr $(, $label:tt = $label_value:expr)*) => {
        metrics::histogram!($name $(, $label => $label_value)*).record($value);
    };
}
