//! Typed errors for the recognition and pipeline layers.
//! Application code wraps these with anyhow context.

use crate::lifecycle::{LifecycleEvent, PipelineState};
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum HandsFreeError {
    /// A reference piece image is missing or unreadable
    #[error("Reference image {path} could not be loaded: {source}")]
    ReferenceImage {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    /// Screen capture produced nothing usable
    #[error("Screen capture failed: {message}")]
    Capture { message: String },

    /// The mouse could not be driven
    #[error("Mouse actuation failed: {message}")]
    Actuation { message: String },

    #[error("Cannot {event:?} while {state:?}")]
    InvalidTransition {
        state: PipelineState,
        event: LifecycleEvent,
    },
}
