pub mod dataset;
pub mod error;
pub(crate) mod progress;
pub mod retry;
pub mod text;
