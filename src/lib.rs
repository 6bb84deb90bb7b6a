pub mod config;
pub mod encoder;
pub mod job;
pub mod migration;
pub mod pipeline;
pub mod portfolio;
pub mod server;
pub mod store;
pub mod supabase;

pub use config::{Args, StoreConfig, StoreKind};
pub use encoder::{EncodeError, Encoder, Resolution};
pub use job::Job;
pub use pipeline::{ArtifactDescriptor, Frame, FrameBatch, Pipeline};
pub use store::{create_store, ArtifactStore, Store, StoreError};
