//! Identity export
//!
//! # Components
//!
//! - `ExportBatcher`: buffers admitted identities and flushes them in chunks
//! - `ExporterState`: the persisted counters and pending buffer
//! - `DeliverySink`: uploads chunk files to a remote host (`ScpSink`), or
//!   does nothing when delivery is not configured (`DisabledSink`)
//! - `write_entity_exports`: writes the accepted entity list as JSON and CSV

mod batcher;
mod chunk;
mod entities;
mod sink;

pub use batcher::{ExportBatcher, ExporterState, EXPORTER_STATE_FILE};
pub use chunk::{chunk_file_stem, highest_chunk_ordinal, write_chunk, ChunkFiles};
pub use entities::{write_entity_exports, ENTITIES_CSV_FILE, ENTITIES_JSON_FILE};
pub use sink::{build_sink, DeliverySink, DisabledSink, ScpSink};

/// Directory under the data dir that holds chunk files
pub const EXPORT_DIR: &str = "exports";
