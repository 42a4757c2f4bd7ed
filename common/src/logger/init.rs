use tracing_subscriber::{EnvFilter, fmt, prelude::*};

static LOGGER_INIT: once_cell::sync::OnceCell<()> = once_cell::sync::OnceCell::new();

/// Initialize the global tracing subscriber once per process.
///
/// `json = true` selects the production (machine-parseable) formatter;
/// otherwise a human-readable pretty formatter is used, matching
/// `ENVIRONMENT=production` vs local development.
pub fn init_tracing(service_name: &'static str, json: bool) {
    LOGGER_INIT.get_or_init(|| {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        let base = fmt::layer()
            .with_target(true)
            .with_thread_ids(true)
            .with_line_number(true)
            .with_span_events(fmt::format::FmtSpan::CLOSE);

        if json {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(base.json())
                .init();
        } else {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(base.pretty())
                .init();
        }

        tracing::info!(service = service_name, "logger initialized");
    });
}
