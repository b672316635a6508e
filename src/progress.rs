use std::io::{self, Write};
use std::time::Instant;

/// Operator-facing console output. Timestamped status goes to stderr; run reports go to stdout.
pub struct ConsoleProgress {
    enabled: bool,
    started: Instant,
}

impl ConsoleProgress {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            started: Instant::now(),
        }
    }

    fn stamped(&self, line: &str) {
        if !self.enabled {
            return;
        }
        let stamp = fmt_elapsed(self.started.elapsed().as_secs());
        let _ = writeln!(io::stderr().lock(), "[{stamp}] {line}");
    }

    pub fn info(&self, msg: impl AsRef<str>) {
        self.stamped(msg.as_ref());
    }

    /// `label 3/10 ( 30.0%)`
    pub fn progress(&self, label: &str, done: usize, total: usize) {
        let total = total.max(1);
        let done = done.min(total);
        let pct = done as f64 * 100.0 / total as f64;
        self.stamped(&format!("{label} {done}/{total} ({pct:5.1}%)"));
    }

    /// Untimestamped report lines (`[OK] ..`, `[SUMMARY] ..`). Always printed.
    pub fn report<I, S>(&self, lines: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut stdout = io::stdout().lock();
        for line in lines {
            let _ = writeln!(stdout, "{}", line.as_ref());
        }
    }
}

/// `mm:ss`, or `hh:mm:ss` past the hour.
fn fmt_elapsed(secs: u64) -> String {
    let (h, m, s) = (secs / 3600, secs / 60 % 60, secs % 60);
    if h == 0 {
        format!("{m:02}:{s:02}")
    } else {
        format!("{h:02}:{m:02}:{s:02}")
    }
}
