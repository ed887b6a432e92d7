use is_terminal::IsTerminal;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::time::FormatTime;

pub fn init_tracing(format: &str) {
    match format {
        "json" => init_json_tracing(),
        _ => init_text_tracing(),
    }
}

fn init_json_tracing() {
    tracing_subscriber::fmt()
        .json()
        .with_timer(EpochTime)
        .with_env_filter(EnvFilter::from_default_env())
        .with_ansi(false)
        .with_writer(std::io::stderr)
        .init();
}

fn init_text_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_ansi(std::io::stderr().is_terminal())
        .with_writer(std::io::stderr)
        .init();
}

// Seconds since the UNIX epoch with nanoseconds.
struct EpochTime;

impl FormatTime for EpochTime {
    fn format_time(&self, w: &mut Writer<'_>) -> std::fmt::Result {
        let now = chrono::Utc::now();
        write!(w, "{}.{:09}", now.timestamp(), now.timestamp_subsec_nanos())
    }
}
