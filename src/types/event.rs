//! Production events.

use tokio::sync::broadcast;

use crate::MuninnError;

/// Event emitted while an artifact is produced.
#[derive(Debug, Clone, PartialEq)]
pub enum MediaEvent {
    /// A production started.
    Started,
    /// Completion percentage in `0.0..=100.0`.
    Progress(f32),
    /// The artifact is ready under this external reference.
    Succeeded(String),
    /// The production failed; a new request will start over.
    Failed(MuninnError),
}

impl MediaEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, MediaEvent::Succeeded(_) | MediaEvent::Failed(_))
    }
}

/// Handle used by producers to publish progress.
#[derive(Debug, Clone, Default)]
pub struct ProgressReporter {
    tx: Option<broadcast::Sender<MediaEvent>>,
}

impl ProgressReporter {
    pub(crate) fn new(tx: broadcast::Sender<MediaEvent>) -> Self {
        Self { tx: Some(tx) }
    }

    /// Reporter that discards everything.
    pub fn noop() -> Self {
        Self::default()
    }

    /// Publish a percentage, clamped to `0..=100`.
    pub fn report(&self, percent: f32) {
        if let Some(tx) = &self.tx {
            // No subscribers is fine.
            let _ = tx.send(MediaEvent::Progress(percent.clamp(0.0, 100.0)));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_events() {
        assert!(MediaEvent::Succeeded("f".into()).is_terminal());
        assert!(MediaEvent::Failed(MuninnError::StaleUrl).is_terminal());
        assert!(!MediaEvent::Progress(10.0).is_terminal());
        assert!(!MediaEvent::Started.is_terminal());
    }

    #[test]
    fn progress_is_clamped() {
        let (tx, mut rx) = broadcast::channel(4);
        let reporter = ProgressReporter::new(tx);
        reporter.report(140.0);
        assert_eq!(rx.try_recv().unwrap(), MediaEvent::Progress(100.0));
    }
}
