use {
  boxjail::{Arguments, Environment, Jailer, Mode, Result, SandboxConfig},
  std::{fs, io::Write, process, time::SystemTime},
  tracing::error,
  tracing_subscriber::EnvFilter,
};

const FATAL_LOG: &str = "/eval/isolate.log";

fn main() {
  let arguments = Arguments::parse_or_suggest();

  init_tracing(arguments.verbose_level());

  let result = arguments
    .into_config()
    .and_then(|(mode, config)| launch(mode, config));

  if let Err(fatal) = result {
    error!("{fatal}");
    log_fatal(&fatal.to_string());
    process::exit(1);
  }
}

fn launch(mode: Mode, config: SandboxConfig) -> Result {
  let environment = Environment::default();

  let mut jailer = Jailer::new(config, &environment)?;

  jailer.start(mode)
}

fn init_tracing(verbose: u8) {
  let default_level = match verbose {
    0 => "warn",
    1 => "info",
    2 => "debug",
    _ => "trace",
  };

  let filter =
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(std::io::stderr)
    .with_target(false)
    .init();
}

/// Best-effort append of a fatal diagnostic where the judge host
/// collects them; a failure to log must not mask the error itself.
fn log_fatal(message: &str) {
  let timestamp = SystemTime::now()
    .duration_since(SystemTime::UNIX_EPOCH)
    .map(|duration| duration.as_secs())
    .unwrap_or(0);

  if let Ok(mut log) = fs::OpenOptions::new().append(true).create(true).open(FATAL_LOG) {
    let _ = writeln!(log, "[{timestamp}] {message}");
  }
}
