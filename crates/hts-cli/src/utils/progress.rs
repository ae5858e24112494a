use htskit::engine::progress::{Progress, ProgressCallback};
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{info, warn};

const SPINNER_TICK_MS: u64 = 80;

/// The bar of the current phase. A phase starts as a spinner and turns into a
/// counting bar once the number of plates is known.
#[derive(Default)]
struct PhaseState {
    phase: Option<&'static str>,
    bar: Option<ProgressBar>,
}

impl PhaseState {
    fn replace(&mut self, bar: ProgressBar) {
        if let Some(previous) = self.bar.replace(bar) {
            if !previous.is_finished() {
                previous.finish_and_clear();
            }
        }
    }
}

/// Draws run assembly progress on stderr: a spinner per phase and a plate counter
/// naming the plate loaded last.
#[derive(Clone)]
pub struct CliProgressHandler {
    state: Arc<Mutex<PhaseState>>,
    hidden: bool,
}

impl CliProgressHandler {
    pub fn new() -> Self {
        Self {
            state: Arc::default(),
            hidden: false,
        }
    }

    #[cfg(test)]
    fn hidden() -> Self {
        Self {
            state: Arc::default(),
            hidden: true,
        }
    }

    pub fn get_callback(&self) -> ProgressCallback<'static> {
        let state = self.state.clone();
        let hidden = self.hidden;
        let target = move || {
            if hidden {
                ProgressDrawTarget::hidden()
            } else {
                ProgressDrawTarget::stderr()
            }
        };

        Box::new(move |progress: Progress| {
            let Ok(mut state) = state.lock() else {
                warn!("Progress state mutex was poisoned. Cannot update progress.");
                return;
            };

            match progress {
                Progress::PhaseStart { name } => {
                    let spinner = ProgressBar::with_draw_target(None, target())
                        .with_style(spinner_style())
                        .with_message(name);
                    spinner.enable_steady_tick(Duration::from_millis(SPINNER_TICK_MS));
                    state.phase = Some(name);
                    state.replace(spinner);
                }
                Progress::PhaseFinish => {
                    let phase = state.phase.take().unwrap_or("Done");
                    if let Some(bar) = state.bar.as_ref().filter(|bar| !bar.is_finished()) {
                        bar.disable_steady_tick();
                        bar.finish_with_message(format!("✓ {}", phase));
                    }
                }
                Progress::PlatesStart { total } => {
                    let bar = ProgressBar::with_draw_target(Some(total), target())
                        .with_style(plate_bar_style())
                        .with_prefix(state.phase.unwrap_or("Loading plates"));
                    state.replace(bar);
                }
                Progress::PlateLoaded { name } => {
                    if let Some(bar) = &state.bar {
                        bar.set_message(name);
                        bar.inc(1);
                    }
                }
                Progress::PlatesFinish => {
                    if let Some(bar) = &state.bar {
                        let total = bar.length().unwrap_or_else(|| bar.position());
                        bar.set_position(total);
                        bar.finish_with_message(format!("✓ {} plates loaded", total));
                    }
                }
                Progress::Message(msg) => match &state.bar {
                    Some(bar) if !bar.is_finished() => bar.println(format!("  {}", msg)),
                    _ => info!("{}", msg),
                },
            }
        })
    }
}

fn spinner_style() -> ProgressStyle {
    ProgressStyle::with_template("{spinner:.green} {msg}")
        .expect("spinner template is valid")
}

fn plate_bar_style() -> ProgressStyle {
    ProgressStyle::with_template("{prefix:.bold} [{bar:32.cyan/blue}] {pos}/{len} plates {msg}")
        .expect("plate bar template is valid")
        .progress_chars("##-")
}

impl Default for CliProgressHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn with_bar<T>(handler: &CliProgressHandler, check: impl FnOnce(&ProgressBar) -> T) -> T {
        let state = handler.state.lock().unwrap();
        check(state.bar.as_ref().expect("a bar is active"))
    }

    #[test]
    fn nothing_is_drawn_before_the_first_phase() {
        let handler = CliProgressHandler::hidden();
        let state = handler.state.lock().unwrap();
        assert!(state.bar.is_none());
        assert!(state.phase.is_none());
    }

    #[test]
    fn plate_bar_counts_plates_and_names_the_last_one() {
        let handler = CliProgressHandler::hidden();
        let callback = handler.get_callback();

        callback(Progress::PhaseStart {
            name: "Loading plates",
        });
        with_bar(&handler, |bar| {
            assert_eq!(bar.message(), "Loading plates");
            assert!(!bar.is_finished());
        });

        callback(Progress::PlatesStart { total: 3 });
        with_bar(&handler, |bar| {
            assert_eq!(bar.length(), Some(3));
            assert_eq!(bar.position(), 0);
            assert_eq!(bar.prefix(), "Loading plates");
        });

        for name in ["expA_plate1", "expA_plate2"] {
            callback(Progress::PlateLoaded {
                name: name.to_string(),
            });
        }
        with_bar(&handler, |bar| {
            assert_eq!(bar.position(), 2);
            assert_eq!(bar.message(), "expA_plate2");
        });

        callback(Progress::PlatesFinish);
        callback(Progress::PhaseFinish);
        with_bar(&handler, |bar| {
            assert!(bar.is_finished());
            assert_eq!(bar.position(), 3);
            assert_eq!(bar.message(), "✓ 3 plates loaded");
        });
        assert!(handler.state.lock().unwrap().phase.is_none());
    }

    #[test]
    fn phases_finish_with_their_name_across_threads() {
        let handler = CliProgressHandler::hidden();
        let callback = handler.get_callback();

        thread::spawn(move || {
            callback(Progress::PhaseStart {
                name: "Run construction",
            });
            callback(Progress::PhaseFinish);
        })
        .join()
        .unwrap();

        with_bar(&handler, |bar| {
            assert!(bar.is_finished());
            assert_eq!(bar.message(), "✓ Run construction");
        });
    }
}
