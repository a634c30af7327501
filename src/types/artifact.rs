//! Produced artifacts: a byte stream plus delivery metadata.

use std::fmt;
use std::pin::Pin;

use bytes::{Bytes, BytesMut};
use futures_util::{Stream, StreamExt, stream};

use super::plan::{ArtifactKind, DeliveryPlan};
use crate::Result;

/// Boxed stream of media bytes.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

/// Metadata handed to the delivery platform together with the bytes.
#[derive(Debug, Clone, PartialEq)]
pub struct ArtifactMetadata {
    pub kind: ArtifactKind,
    pub video_id: String,
    pub title: Option<String>,
    pub performer: Option<String>,
    pub duration_secs: Option<f64>,
    /// File name suggested for the upload.
    pub file_name: String,
    /// Upload only to obtain a reusable reference (placeholders, cache warmups).
    pub temporary: bool,
}

impl ArtifactMetadata {
    /// Metadata for an artifact of `plan`.
    pub fn for_plan(plan: &DeliveryPlan, kind: ArtifactKind, container: &str) -> Self {
        let extension = match kind {
            ArtifactKind::Audio => "mp3",
            ArtifactKind::Video => container,
        };
        Self {
            kind,
            video_id: plan.video_id.clone(),
            title: Some(plan.title.clone()),
            performer: Some(plan.author.clone()),
            duration_secs: Some(plan.duration_secs),
            file_name: format!("{}.{extension}", plan.video_id),
            temporary: false,
        }
    }

    /// Metadata for a "loading" placeholder.
    pub fn placeholder(kind: ArtifactKind) -> Self {
        let file_name = match kind {
            ArtifactKind::Audio => "placeholder.mp3",
            ArtifactKind::Video => "placeholder.mp4",
        };
        Self {
            kind,
            video_id: String::new(),
            title: Some(kind.as_str().to_string()),
            performer: None,
            duration_secs: None,
            file_name: file_name.to_string(),
            temporary: true,
        }
    }
}

/// A produced artifact.
pub struct Artifact {
    pub metadata: ArtifactMetadata,
    body: ByteStream,
}

impl Artifact {
    pub fn from_stream(metadata: ArtifactMetadata, body: ByteStream) -> Self {
        Self { metadata, body }
    }

    pub fn from_bytes(metadata: ArtifactMetadata, bytes: impl Into<Bytes>) -> Self {
        let bytes = bytes.into();
        Self {
            metadata,
            body: Box::pin(stream::once(async move { Ok(bytes) })),
        }
    }

    pub fn into_stream(self) -> ByteStream {
        self.body
    }

    /// Drain the body into memory, failing on the first stream error.
    pub async fn bytes(self) -> Result<Bytes> {
        let mut body = self.body;
        let mut buf = BytesMut::new();
        while let Some(chunk) = body.next().await {
            buf.extend_from_slice(&chunk?);
        }
        Ok(buf.freeze())
    }
}

impl fmt::Debug for Artifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Artifact")
            .field("metadata", &self.metadata)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MuninnError;

    #[tokio::test]
    async fn bytes_concatenates_chunks() {
        let body: ByteStream = Box::pin(stream::iter(vec![
            Ok(Bytes::from_static(b"ab")),
            Ok(Bytes::from_static(b"cd")),
        ]));
        let artifact = Artifact::from_stream(ArtifactMetadata::placeholder(ArtifactKind::Audio), body);
        assert_eq!(artifact.bytes().await.unwrap(), Bytes::from_static(b"abcd"));
    }

    #[tokio::test]
    async fn bytes_surfaces_stream_error() {
        let body: ByteStream = Box::pin(stream::iter(vec![
            Ok(Bytes::from_static(b"ab")),
            Err(MuninnError::DownloadFailed("reset".into())),
        ]));
        let artifact = Artifact::from_stream(ArtifactMetadata::placeholder(ArtifactKind::Video), body);
        assert!(matches!(
            artifact.bytes().await,
            Err(MuninnError::DownloadFailed(_))
        ));
    }
}
