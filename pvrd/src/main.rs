mod backend;
mod serve;

use std::path::PathBuf;

use clap::Parser;
use clap::ValueEnum;

use pvr_core::error::Error;
use pvr_core::tracing_ext::init_tracing;

#[derive(Parser)]
#[command(author, version, about)]
struct Opt {
    /// Path to a configuration file in a YAML format.
    ///
    /// The PVRD_CONFIG environment variable is used if this option is not
    /// specified.
    #[arg(short, long, env = "PVRD_CONFIG")]
    config: PathBuf,

    /// Logging format.
    #[arg(long, value_enum, env = "PVRD_LOG_FORMAT", default_value = "text")]
    log_format: LogFormat,

    /// Path to a JSON file providing channels, programs, timers and
    /// recordings.
    #[arg(short, long, env = "PVRD_BACKEND")]
    backend: PathBuf,
}

#[derive(Clone, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    let opt = Opt::parse();

    init_tracing(match opt.log_format {
        LogFormat::Text => "text",
        LogFormat::Json => "json",
    });

    let config = pvr_core::config::load(&opt.config)?;

    serve::main(config, opt.backend).await
}
