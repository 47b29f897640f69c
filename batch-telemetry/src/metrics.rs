use std::net::{IpAddr, Ipv6Addr, SocketAddr};
use std::sync::Mutex;
use std::time::Duration;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing::trace;

/// Port of the Prometheus scrape endpoint started by [`init_metrics`].
pub const DEFAULT_METRICS_PORT: u16 = 9000;

/// Interval between upkeep passes over the recorder's histograms.
const UPKEEP_INTERVAL: Duration = Duration::from_secs(5);

// The recorder is process-global and can only be installed once, while tests call
// `init_metrics_handle` repeatedly. The fallible init rules out `OnceLock`.
static PROMETHEUS_HANDLE: Mutex<Option<PrometheusHandle>> = Mutex::new(None);

/// Installs the global recorder without an HTTP listener and returns a render handle.
///
/// Used by tests and by callers that print a metrics snapshot at the end of a run.
/// Must be called from within a tokio runtime.
pub fn init_metrics_handle() -> Result<PrometheusHandle, BuildError> {
    let mut cached = PROMETHEUS_HANDLE
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());

    if let Some(handle) = &*cached {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    *cached = Some(handle.clone());

    let upkeep_handle = handle.clone();
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(UPKEEP_INTERVAL).await;
            trace!("running metrics upkeep");
            upkeep_handle.run_upkeep();
        }
    });

    Ok(handle)
}

/// Installs the global recorder with a scrape endpoint on `[::]:{port}/metrics`.
///
/// `run_label` is attached to every series so concurrent runs on one host can be told apart.
/// Must be called from within a tokio runtime.
pub fn init_metrics(port: u16, run_label: Option<&str>) -> Result<(), BuildError> {
    let mut builder = PrometheusBuilder::new()
        .with_http_listener(SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), port));

    if let Some(run_label) = run_label {
        builder = builder.add_global_label("run", run_label);
    }

    builder.install()
}
