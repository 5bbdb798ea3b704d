//! Collectors for OS network state, run once per scheduler tick.

mod connections;
mod interfaces;

pub use connections::*;
pub use interfaces::*;

use async_trait::async_trait;
use thiserror::Error;

use crate::model::{ConnectionSummary, InterfaceStatus};

/// Collection error types.
#[derive(Error, Debug)]
pub enum CollectionError {
    #[error("failed to read {source_name}: {message}")]
    Read {
        source_name: String,
        message: String,
    },
    #[error("not supported on this platform")]
    Unsupported,
    #[error("collection task failed: {0}")]
    Task(String),
}

/// Source of the interface list.
#[async_trait]
pub trait InterfaceCollector: Send + Sync {
    async fn collect(&self) -> Result<Vec<InterfaceStatus>, CollectionError>;
}

/// Source of the connection summary.
#[async_trait]
pub trait ConnectionCollector: Send + Sync {
    async fn collect(&self) -> Result<ConnectionSummary, CollectionError>;
}
