//! Core data types shared by the pipeline stages.

pub mod artifact;
pub mod event;
pub mod format;
pub mod plan;

pub use artifact::{Artifact, ArtifactMetadata, ByteStream};
pub use event::{MediaEvent, ProgressReporter};
pub use format::{EncodingFormat, MediaUrl, Quality, bytes_to_human_size};
pub use plan::{ArtifactKind, DeliveryPlan, VideoInfo};
