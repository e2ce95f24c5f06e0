use tracing::Subscriber;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// JSON subscriber filtered by `RUST_LOG`, falling back to `default_filter`.
pub fn get_subscriber<Sink>(default_filter: &str, sink: Sink) -> impl Subscriber + Send + Sync
where
    Sink: for<'a> MakeWriter<'a> + Send + Sync + 'static,
{
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let formatting_layer = tracing_subscriber::fmt::layer()
        .with_writer(sink)
        .json();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(formatting_layer)
}

/// Install the subscriber globally and bridge `log` records into it.
///
/// Only the first call takes effect; later calls (one per integration test)
/// are ignored.
pub fn init_subscriber(subscriber: impl Subscriber + Send + Sync + 'static) {
    if subscriber.try_init().is_err() {
        tracing::debug!("Global subscriber already installed");
    }
}

pub fn init_telemetry() {
    init_subscriber(get_subscriber("info", std::io::stdout));
}
