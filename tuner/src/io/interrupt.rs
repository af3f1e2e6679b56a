//! Ctrl-C handling.
//!
//! The first interrupt only raises a flag; the driver notices it between trials and
//! shuts down gracefully. Build and benchmark commands run in their own process group,
//! so the terminal's Ctrl-C never reaches them and the trial in flight completes. A
//! second interrupt kills that group and aborts the process at once, leaving any backup
//! in place for the next start to reconcile.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

use anyhow::{Context, Result};
use tracing::{debug, warn};

use crate::exit_codes;
use crate::io::process;

#[derive(Debug, Clone, Default)]
pub struct InterruptFlag {
    hits: Arc<AtomicUsize>,
}

impl InterruptFlag {
    /// A flag nothing but [`InterruptFlag::trigger`] will ever raise.
    pub fn never() -> Self {
        Self::default()
    }

    /// Listen for Ctrl-C on a background thread running a single-threaded runtime.
    pub fn install() -> Result<Self> {
        let flag = Self::default();
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .context("build signal runtime")?;
        let hits = Arc::clone(&flag.hits);
        thread::Builder::new()
            .name("ctrl-c".to_string())
            .spawn(move || {
                runtime.block_on(async move {
                    loop {
                        if let Err(err) = tokio::signal::ctrl_c().await {
                            warn!(%err, "ctrl-c listener stopped");
                            return;
                        }
                        let seen = hits.fetch_add(1, Ordering::SeqCst) + 1;
                        if seen == 1 {
                            eprintln!(
                                "\ninterrupt received: finishing the current trial, press Ctrl-C again to abort"
                            );
                        } else {
                            eprintln!("\naborting; the artifact is restored on the next start");
                            process::kill_active_group();
                            std::process::exit(exit_codes::ABORTED);
                        }
                    }
                });
            })
            .context("spawn ctrl-c listener")?;
        debug!("ctrl-c listener installed");
        Ok(flag)
    }

    pub fn trigger(&self) {
        self.hits.fetch_add(1, Ordering::SeqCst);
    }

    pub fn is_set(&self) -> bool {
        self.hits.load(Ordering::SeqCst) > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_state() {
        let flag = InterruptFlag::never();
        let observer = flag.clone();
        assert!(!observer.is_set());
        flag.trigger();
        assert!(observer.is_set());
    }
}
