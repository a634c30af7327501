//! Local directory sink.

use std::path::PathBuf;

use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::traits::ArtifactSink;
use crate::types::Artifact;
use crate::{MuninnError, Result};

/// Stores artifacts as files; the reference is the file path.
///
/// Temporary uploads go to a `.tmp` subdirectory.
#[derive(Debug, Clone)]
pub struct DirectorySink {
    dir: PathBuf,
}

impl DirectorySink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &PathBuf {
        &self.dir
    }
}

#[async_trait]
impl ArtifactSink for DirectorySink {
    fn name(&self) -> &str {
        "directory"
    }

    async fn upload(&self, artifact: Artifact) -> Result<String> {
        let dir = if artifact.metadata.temporary {
            self.dir.join(".tmp")
        } else {
            self.dir.clone()
        };
        fs::create_dir_all(&dir).await?;

        let path = dir.join(&artifact.metadata.file_name);
        // Keep the extension: `x.mp3` and `x.mp4` may be uploaded together.
        let partial = dir.join(format!("{}.part", artifact.metadata.file_name));
        let mut file = fs::File::create(&partial).await?;
        let mut body = artifact.into_stream();
        let mut written = 0u64;
        while let Some(chunk) = body.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => {
                    drop(file);
                    let _ = fs::remove_file(&partial).await;
                    return Err(e);
                }
            };
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;
        drop(file);
        fs::rename(&partial, &path).await?;

        debug!(path = %path.display(), bytes = written, "artifact stored");
        path.into_os_string()
            .into_string()
            .map_err(|p| MuninnError::Delivery(format!("non UTF-8 path: {p:?}")))
    }
}
