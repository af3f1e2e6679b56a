//! Diagnostics for `tuner` runs, written to stderr.
//!
//! Tracing here is separate from the two product outputs: per-trial build and benchmark
//! transcripts (`io/trial_log`, always written) and the stdout progress lines and final
//! report (`report`). Neither is affected by the filter chosen below.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Filter used when `RUST_LOG` is unset, by `-v` count.
pub fn default_directive(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "warn",
        1 => "warn,tuner=info",
        2 => "warn,tuner=debug",
        _ => "warn,tuner=trace",
    }
}

/// Install the stderr subscriber.
///
/// `RUST_LOG` wins over `-v` when set:
///
/// ```bash
/// RUST_LOG=tuner::sampler=trace tuner --trials 5
/// ```
pub fn init(verbosity: u8) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(verbosity)));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(verbosity > 1)
                .compact(),
        )
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbosity_raises_only_the_tuner_target() {
        assert_eq!(default_directive(0), "warn");
        assert_eq!(default_directive(1), "warn,tuner=info");
        assert_eq!(default_directive(2), "warn,tuner=debug");
        assert_eq!(default_directive(9), "warn,tuner=trace");
        for v in 0..4 {
            EnvFilter::try_new(default_directive(v)).expect("directive parses");
        }
    }
}
