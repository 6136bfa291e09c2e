// [libs/shared/observability/src/lib.rs]
//! Tracing setup shared by every QuotaForge binary and test harness:
//! an env-filtered subscriber (compact in development, flattened JSON
//! in release) plus a panic hook that routes thread panics through the
//! same structured log instead of letting them print to stderr alone.

use std::panic;

use tracing::{error, info, instrument};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Installs the global subscriber and panic hook for `service_name`.
///
/// The env filter defaults to debug-level logs for `service_name` and
/// warn-level for the noisier HTTP/DB crates, overridable with
/// `RUST_LOG`. Panics anywhere in the process are logged with their
/// file:line:column location before the thread unwinds.
///
/// # Panics
/// Panics if a global subscriber has already been installed.
#[instrument(skip_all, fields(service = %service_name))]
pub fn init_tracing(service_name: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let default_level = if cfg!(debug_assertions) { "debug" } else { "info" };
        format!("{service_name}={default_level},tower_http=warn,hyper=warn,libsql=error").into()
    });

    if cfg!(debug_assertions) {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().compact().with_target(false))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().flatten_event(true))
            .init();
    }

    let service = service_name.to_string();
    panic::set_hook(Box::new(move |info| {
        let location = info
            .location()
            .map(|l| format!("{}:{}:{}", l.file(), l.line(), l.column()))
            .unwrap_or_else(|| "unknown".to_string());

        let message = info
            .payload()
            .downcast_ref::<&str>()
            .copied()
            .or_else(|| info.payload().downcast_ref::<String>().map(String::as_str))
            .unwrap_or("panic payload was not a string");

        error!(target: "panic", service = %service, location = %location, "{message}");
    }));

    info!("tracing initialized for {service_name}");
}
