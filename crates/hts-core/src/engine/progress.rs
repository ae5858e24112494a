//! Progress events emitted while a run is assembled.

#[derive(Debug, Clone)]
pub enum Progress {
    PhaseStart { name: &'static str },
    PhaseFinish,

    /// Loading of `total` plates begins.
    PlatesStart { total: u64 },
    PlateLoaded { name: String },
    PlatesFinish,

    Message(String),
}

pub type ProgressCallback<'a> = Box<dyn Fn(Progress) + Send + Sync + 'a>;

/// Forwards events to an optional callback; without one, reporting is a no-op.
#[derive(Default)]
pub struct ProgressReporter<'a> {
    callback: Option<ProgressCallback<'a>>,
}

impl<'a> ProgressReporter<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_callback(callback: ProgressCallback<'a>) -> Self {
        Self {
            callback: Some(callback),
        }
    }

    #[inline]
    pub fn report(&self, event: Progress) {
        if let Some(cb) = &self.callback {
            cb(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn reporter_forwards_events_to_callback() {
        let seen = Mutex::new(Vec::new());
        let reporter = ProgressReporter::with_callback(Box::new(|event| {
            if let Progress::PlateLoaded { name } = event {
                seen.lock().unwrap().push(name);
            }
        }));
        reporter.report(Progress::PlatesStart { total: 2 });
        reporter.report(Progress::PlateLoaded {
            name: "plate_1".to_string(),
        });
        reporter.report(Progress::PlatesFinish);
        drop(reporter);
        assert_eq!(seen.into_inner().unwrap(), vec!["plate_1"]);
    }

    #[test]
    fn reporter_without_callback_ignores_events() {
        ProgressReporter::new().report(Progress::Message("ignored".to_string()));
    }
}
