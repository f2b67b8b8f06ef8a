//! Shared test setup.
//!
//! `RUST_LOG` filters the output, e.g. `RUST_LOG=cbtree=trace` to follow
//! every rotation and commit.

#![allow(dead_code)]

use std::sync::Once;

use rand::rngs::StdRng;
use rand::SeedableRng;

use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

static INIT: Once = Once::new();

/// Installs a test-friendly subscriber. Only the first call has an effect.
pub fn init_tracing() {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
        let console = tracing_subscriber::fmt::layer()
            .with_test_writer()
            .with_thread_names(true)
            .with_span_events(FmtSpan::CLOSE)
            .with_filter(filter);
        let _ = tracing_subscriber::registry().with(console).try_init();
    });
}

/// Seeded generator, so a failing sequence can be replayed.
pub fn rng(seed: u64) -> StdRng {
    StdRng::seed_from_u64(seed)
}
