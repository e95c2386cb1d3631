//! Progress reporting for apply and destroy runs.

use crate::ui;
use indicatif::{ProgressBar, ProgressStyle};
use reconcile::{NodeReport, ProgressCallback};

/// Progress bar over every node in a run, updated as waves complete
pub struct WaveProgress {
    bar: ProgressBar,
    verbose: bool,
}

impl WaveProgress {
    pub fn new(total: usize, verbose: bool) -> Self {
        let bar = ProgressBar::new(total as u64);
        if let Ok(style) =
            ProgressStyle::default_bar().template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
        {
            bar.set_style(style.progress_chars("=>-"));
        }
        Self { bar, verbose }
    }

    pub fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

impl ProgressCallback for WaveProgress {
    fn on_wave_start(&mut self, index: usize, ids: &[String]) {
        log::info!("Wave {index}: {}", ids.join(", "));
        self.bar.set_message(format!("wave {index}"));
    }

    fn on_node_complete(&mut self, report: &NodeReport) {
        self.bar
            .set_message(format!("{} {}", ui::status_symbol(report.status), report.id));
        if self.verbose {
            self.bar.println(format!(
                "  {} {} ({} attempt{})",
                ui::status_symbol(report.status),
                report.id,
                report.attempts,
                if report.attempts == 1 { "" } else { "s" }
            ));
        }
        self.bar.inc(1);
    }

    fn on_wave_complete(&mut self, index: usize) {
        log::debug!("Wave {index} complete");
    }
}
