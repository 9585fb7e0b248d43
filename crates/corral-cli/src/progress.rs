//! Progress reporting with TTY detection (§7 "User surface").
//!
//! Deciding whether stdout supports an interactive bar uses the standard
//! library's `std::io::IsTerminal` (stable since 1.70) rather than a
//! dedicated crate for the same check.

use std::io::IsTerminal;
use std::sync::Mutex;
use std::time::Instant;

use corral_core::{Reporter, TaskOutcome};
use corral_types::OutputFormat;
use indicatif::{ProgressBar, ProgressStyle};

pub fn is_tty() -> bool {
    std::io::stdout().is_terminal()
}

/// Renders worker events according to the configured [`OutputFormat`]
/// (§7: one line per repo in `progress`, one JSON event per state change
/// in `json`, nothing until the final summary in `table`/`quiet`).
pub struct CliReporter {
    format: OutputFormat,
    total: usize,
    done: Mutex<usize>,
    bar: Option<ProgressBar>,
    start: Instant,
}

impl CliReporter {
    pub fn new(format: OutputFormat, total: usize) -> Self {
        let bar = if format == OutputFormat::Progress && is_tty() && total > 0 {
            let pb = ProgressBar::new(total as u64);
            pb.set_style(
                ProgressStyle::default_bar()
                    .template("{msg} [{bar:40.cyan/blue}] {pos}/{len} ({elapsed})")
                    .unwrap_or_else(|_| ProgressStyle::default_bar())
                    .progress_chars("#>-"),
            );
            Some(pb)
        } else {
            None
        };
        Self {
            format,
            total,
            done: Mutex::new(0),
            bar,
            start: Instant::now(),
        }
    }

    fn percent_done(&self) -> u32 {
        let done = *self.done.lock().unwrap_or_else(|e| e.into_inner());
        if self.total == 0 {
            100
        } else {
            ((done * 100) / self.total) as u32
        }
    }
}

impl Reporter for CliReporter {
    fn repo_started(&mut self, full_name: &str) {
        match self.format {
            OutputFormat::Json => {
                println!(
                    "{}",
                    serde_json::json!({"event": "start", "repo": full_name})
                );
            }
            OutputFormat::Progress => {
                if let Some(pb) = &self.bar {
                    pb.set_message(format!("cloning {full_name}"));
                } else {
                    eprintln!("[start] {full_name}");
                }
            }
            OutputFormat::Table | OutputFormat::Quiet => {}
        }
    }

    fn repo_finished(&mut self, outcome: &TaskOutcome) {
        {
            let mut done = self.done.lock().unwrap_or_else(|e| e.into_inner());
            *done += 1;
        }
        let pct = self.percent_done();

        match (&self.format, &outcome.result) {
            (OutputFormat::Json, Ok(())) => println!(
                "{}",
                serde_json::json!({"event": "success", "repo": outcome.full_name})
            ),
            (OutputFormat::Json, Err(e)) => println!(
                "{}",
                serde_json::json!({"event": "fail", "repo": outcome.full_name, "error": e.to_string()})
            ),
            (OutputFormat::Progress, Ok(())) => {
                if let Some(pb) = &self.bar {
                    pb.inc(1);
                } else {
                    eprintln!("[{pct:>3}%] ok   {}", outcome.full_name);
                }
            }
            (OutputFormat::Progress, Err(e)) => {
                if let Some(pb) = &self.bar {
                    pb.inc(1);
                }
                eprintln!("[{pct:>3}%] fail {} ({e})", outcome.full_name);
            }
            (OutputFormat::Table, _) | (OutputFormat::Quiet, _) => {}
        }
    }
}

impl Drop for CliReporter {
    fn drop(&mut self) {
        if let Some(pb) = &self.bar {
            pb.finish_and_clear();
            eprintln!(
                "done in {:?} ({}/{})",
                self.start.elapsed(),
                *self.done.lock().unwrap_or_else(|e| e.into_inner()),
                self.total
            );
        }
    }
}
