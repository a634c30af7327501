//! Per-artifact event subscriptions.

use tokio::sync::broadcast::{self, error::RecvError};

use crate::types::MediaEvent;
use crate::{MuninnError, Result};

/// Feed of [`MediaEvent`]s for one (video, kind) pair.
///
/// A subscription created after the artifact settled first yields the
/// terminal event, so late subscribers never wait forever. Progress events
/// may be skipped when the subscriber falls behind; terminal events are
/// never skipped.
#[derive(Debug)]
pub struct ArtifactSubscription {
    replay: Option<MediaEvent>,
    rx: broadcast::Receiver<MediaEvent>,
}

impl ArtifactSubscription {
    pub(crate) fn new(replay: Option<MediaEvent>, rx: broadcast::Receiver<MediaEvent>) -> Self {
        Self { replay, rx }
    }

    /// Next event, or `None` when the entry was dropped.
    pub async fn recv(&mut self) -> Option<MediaEvent> {
        if let Some(event) = self.replay.take() {
            return Some(event);
        }
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Wait for the production to settle and return its reference.
    pub async fn wait(mut self) -> Result<String> {
        while let Some(event) = self.recv().await {
            match event {
                MediaEvent::Succeeded(reference) => return Ok(reference),
                MediaEvent::Failed(err) => return Err(err),
                MediaEvent::Started | MediaEvent::Progress(_) => {}
            }
        }
        Err(MuninnError::CacheInconsistency(
            "entry dropped before its production settled".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn replayed_terminal_comes_first() {
        let (_tx, rx) = broadcast::channel(4);
        let sub = ArtifactSubscription::new(Some(MediaEvent::Succeeded("file-1".into())), rx);
        assert_eq!(sub.wait().await.unwrap(), "file-1");
    }

    #[tokio::test]
    async fn wait_skips_progress() {
        let (tx, rx) = broadcast::channel(4);
        let sub = ArtifactSubscription::new(None, rx);
        tx.send(MediaEvent::Started).unwrap();
        tx.send(MediaEvent::Progress(50.0)).unwrap();
        tx.send(MediaEvent::Failed(MuninnError::StaleUrl)).unwrap();
        assert_eq!(sub.wait().await, Err(MuninnError::StaleUrl));
    }

    #[tokio::test]
    async fn lagging_subscriber_still_sees_terminal() {
        let (tx, rx) = broadcast::channel(2);
        let sub = ArtifactSubscription::new(None, rx);
        for i in 0..10 {
            tx.send(MediaEvent::Progress(i as f32)).unwrap();
        }
        tx.send(MediaEvent::Succeeded("file-2".into())).unwrap();
        assert_eq!(sub.wait().await.unwrap(), "file-2");
    }

    #[tokio::test]
    async fn closed_channel_is_an_inconsistency() {
        let (tx, rx) = broadcast::channel::<MediaEvent>(2);
        drop(tx);
        let sub = ArtifactSubscription::new(None, rx);
        assert!(matches!(
            sub.wait().await,
            Err(MuninnError::CacheInconsistency(_))
        ));
    }
}
