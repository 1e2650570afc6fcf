//! tts-core: shared primitives for the TTS synthesis core.
//!
//! Structured errors, ID newtypes, the wire protocol shared by the
//! websocket gateway and the worker pool, environment-driven
//! configuration, request context, and the traits for external
//! collaborators the core only consumes.

pub mod collaborators;
pub mod config;
pub mod errors;
pub mod ids;
pub mod tenant;
pub mod wire;

pub use config::TtsConfig;
pub use errors::{ErrorKind, TtsError, TtsResult};
pub use ids::{DocumentId, JobId, LeaseToken, ModelSlug, UserId, VariantHash};
pub use tenant::RequestContext;
