//! Progress indicators for deploy runs.

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use orchestrator::{ProgressCallback, UnitStatus, Wave};
use std::time::Duration;

use crate::ui;

/// One progress bar per wave, advanced as units finish
pub struct WaveProgress {
    bar: Option<ProgressBar>,
    total_waves: usize,
    hidden: bool,
}

impl WaveProgress {
    pub fn new(total_waves: usize) -> Self {
        Self {
            bar: None,
            total_waves,
            hidden: false,
        }
    }

    /// Progress that draws nothing (quiet and JSON output)
    pub fn hidden(total_waves: usize) -> Self {
        Self {
            hidden: true,
            ..Self::new(total_waves)
        }
    }

    fn style() -> ProgressStyle {
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=>-")
    }
}

impl ProgressCallback for WaveProgress {
    fn on_wave_start(&mut self, wave: &Wave) {
        if !self.hidden {
            ui::step(
                wave.index + 1,
                self.total_waves,
                &format!("Wave {}: {}", wave.index, wave.units.join(", ")),
            );
        }

        let bar = ProgressBar::new(wave.units.len() as u64);
        bar.set_style(Self::style());
        if self.hidden {
            bar.set_draw_target(ProgressDrawTarget::hidden());
        } else {
            bar.enable_steady_tick(Duration::from_millis(100));
        }
        bar.set_message("deploying");
        self.bar = Some(bar);
    }

    fn on_unit_complete(&mut self, unit: &str, status: &UnitStatus) {
        if status.is_failed() {
            log::warn!("{unit}: {status}");
        }
        if let Some(bar) = &self.bar {
            bar.inc(1);
            bar.set_message(format!("{unit}: {status}"));
        }
    }

    fn on_wave_complete(&mut self, wave: &Wave) {
        if let Some(bar) = self.bar.take() {
            bar.finish_and_clear();
        }
        log::debug!("wave {} finished", wave.index);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orchestrator::{Error, SkipCause};

    #[test]
    fn test_hidden_progress_advances_per_unit() {
        let wave = Wave {
            index: 0,
            units: vec!["A".to_string(), "B".to_string(), "C".to_string()],
        };
        let mut progress = WaveProgress::hidden(1);

        progress.on_wave_start(&wave);
        progress.on_unit_complete("A", &UnitStatus::Completed);
        progress.on_unit_complete(
            "B",
            &UnitStatus::Failed {
                reason: Error::Cancelled,
            },
        );
        progress.on_unit_complete(
            "C",
            &UnitStatus::Skipped {
                cause: SkipCause::Cancelled,
            },
        );
        assert_eq!(progress.bar.as_ref().map(ProgressBar::position), Some(3));
        progress.on_wave_complete(&wave);

        assert!(progress.bar.is_none());
    }
}
