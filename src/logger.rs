//! Log output to stderr or a file.

use std::fs::File;
use std::io;
use std::sync::Mutex;

use tracing_subscriber::EnvFilter;

use crate::parse_args::Verbosity;

impl Verbosity {
    fn level(self) -> &'static str {
        match self {
            Verbosity::Quiet => "warn",
            Verbosity::Verbose => "info",
            Verbosity::Debug => "debug",
            Verbosity::Trace => "trace",
        }
    }

    /// Filter for our own crates; everything else stays at warn.
    pub fn filter(self) -> EnvFilter {
        let level = self.level();
        EnvFilter::new(format!(
            "warn,sio_tunnel={0},sio_bridge={0},sio_wire={0}",
            level
        ))
    }
}

/// Install the global subscriber. `RUST_LOG` overrides the verbosity flags.
pub fn init(verbosity: Verbosity, log_file: Option<&str>) -> io::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| verbosity.filter());
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);

    match log_file {
        Some(path) => {
            let file = File::create(path)?;
            builder.with_ansi(false).with_writer(Mutex::new(file)).init();
        }
        None => builder.with_writer(io::stderr).init(),
    }
    Ok(())
}
