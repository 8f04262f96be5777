#[allow(clippy::all)]
pub mod chromeos_update_engine;

pub mod cmd;
pub mod codec;
pub mod error;
pub mod extract;
pub mod payload;

pub use crate::error::{Error, Result};
pub use crate::extract::{ExtractedImage, Extractor, OperationKind, Transfer, extract};
pub use crate::payload::{ExtractionContext, Payload, PayloadHeader};
