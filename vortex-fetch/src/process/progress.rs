//! Download progress parsing and throttling

use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use tokio::time::Instant;

static PROGRESS_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\[download\]\s+(\d+(?:\.\d+)?)%").expect("progress pattern is valid")
});

/// Extract a whole percentage from a downloader progress line
///
/// Fractions are truncated and values are clamped to 0..=100.
pub fn parse_progress(line: &str) -> Option<u8> {
    let caps = PROGRESS_RE.captures(line)?;
    let value: f64 = caps.get(1)?.as_str().parse().ok()?;
    Some(value.clamp(0.0, 100.0).floor() as u8)
}

/// Decides which progress readings are worth an edit of the status message
///
/// A reading is accepted only when it is strictly greater than the last
/// accepted one, and either crosses into a new 5% bucket or arrives after the
/// minimum interval since the last accepted reading.
#[derive(Debug, Clone)]
pub struct ProgressThrottle {
    min_interval: Duration,
    last_pct: Option<u8>,
    last_emit: Instant,
}

impl ProgressThrottle {
    pub fn new(min_interval: Duration, started: Instant) -> Self {
        Self {
            min_interval,
            last_pct: None,
            last_emit: started,
        }
    }

    pub fn accept(&mut self, pct: u8, now: Instant) -> bool {
        if let Some(last) = self.last_pct {
            if pct <= last {
                return false;
            }
        }

        let crossed_bucket = self.last_pct.map_or(true, |last| pct / 5 > last / 5);
        let interval_elapsed = now.saturating_duration_since(self.last_emit) >= self.min_interval;

        if crossed_bucket || interval_elapsed {
            self.last_pct = Some(pct);
            self.last_emit = now;
            true
        } else {
            false
        }
    }

    pub fn last_accepted(&self) -> Option<u8> {
        self.last_pct
    }
}
