//! Periodic progress line on stderr.
//!
//! `mio` has no native timer primitive, so this re-arms the way a
//! single-threaded readiness reactor conventionally does without one:
//! it just remembers the next absolute deadline, and `runtime::run`
//! folds that deadline into the `poll()` timeout alongside every task's
//! own deadline (see `runtime/mod.rs::next_wakeup`).

use crate::config::Config;
use crate::counters::Counters;
use std::time::{Duration, Instant};
use tracing::info;

const TICK: Duration = Duration::from_secs(1);

pub struct StatusReporter {
    next_tick: Instant,
}

impl StatusReporter {
    pub fn new(now: Instant) -> Self {
        Self {
            next_tick: now + TICK,
        }
    }

    pub fn next_deadline(&self) -> Instant {
        self.next_tick
    }

    /// Logs one status line if due, then re-arms. Safe to call on every
    /// reactor tick; it is a no-op when not yet due.
    pub fn fire_if_due(&mut self, now: Instant, in_flight: u64, config: &Config, counters: &Counters) {
        if now < self.next_tick {
            return;
        }
        if config.matcher.is_enabled() {
            info!(
                in_flight,
                max_concurrent = config.concurrent,
                matched = counters.matched,
                initiated = counters.initiated,
                connected = counters.connected,
                completed = counters.completed,
                pattern = config.matcher.pattern().unwrap_or(""),
                "scan progress"
            );
        } else {
            info!(
                in_flight,
                max_concurrent = config.concurrent,
                matched = counters.matched,
                initiated = counters.initiated,
                connected = counters.connected,
                completed = counters.completed,
                "scan progress"
            );
        }
        self.next_tick = now + TICK;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CliArgs;

    fn test_config() -> Config {
        Config::resolve(CliArgs {
            port: 80,
            concurrent: 10,
            connect_timeout: 1,
            read_timeout: 1,
            max_read_size: 1024,
            request: None,
            search_string: None,
            case_insensitive: false,
            extended: false,
            format: "default".into(),
            verbosity: 2,
        })
        .unwrap()
    }

    #[test]
    fn rearms_after_firing() {
        let start = Instant::now();
        let mut reporter = StatusReporter::new(start);
        let config = test_config();
        let counters = Counters::new();

        // Not due yet.
        let before = reporter.next_deadline();
        reporter.fire_if_due(start, 0, &config, &counters);
        assert_eq!(reporter.next_deadline(), before);

        // Due one tick later.
        reporter.fire_if_due(start + TICK, 0, &config, &counters);
        assert_eq!(reporter.next_deadline(), start + TICK + TICK);
    }
}
