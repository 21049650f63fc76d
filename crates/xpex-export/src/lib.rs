//! Export orchestration.
//!
//! [`Exporter`] is the facade the HTTP layer talks to: it validates a
//! request, registers a job, and drives it on a dedicated worker task
//! (resolve recorder → authenticate → connect → seek → stream frames into
//! the encoder → finalize). [`ExportRegistry`] is the process-wide job
//! table; it is not persisted, so a restart loses in-flight jobs and
//! invalidates completed-job download URLs.

pub mod error;
pub mod exporter;
pub mod registry;

pub use error::{milestone_tag, ExportError, ExportResult};
pub use exporter::{ExportSettings, Exporter};
pub use registry::ExportRegistry;
