use tracing_subscriber::filter::{Directive, EnvFilter};

/// Crate target that `-v` flags raise the level of.
const TARGET: &str = "ajo_ledger";

/// Installs the global subscriber. Output goes to stderr so that stdout stays
/// reserved for the wallet report.
///
/// `RUST_LOG` directives take precedence over the verbosity flag.
pub fn set_up(verbosity: u8) {
    let filter = EnvFilter::builder()
        .with_default_directive(default_directive(verbosity))
        .from_env_lossy();

    // A subscriber may already be installed when several tests share a process.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .without_time()
        .with_target(true)
        .try_init();
}

fn default_directive(verbosity: u8) -> Directive {
    format!("{TARGET}={}", max_level(verbosity))
        .parse()
        .unwrap_or_else(|_| Directive::from(tracing::Level::WARN))
}

fn max_level(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    }
}
