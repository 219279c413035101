//! Streaming side of the export.
//!
//! The relay is a bounded hand-off between the fetch driver and the batch
//! writer. The batch writer groups records into chunks and writes each chunk
//! atomically to its own file, with automatic cleanup on failure.

mod atomic_writer;
pub mod batch_writer;
pub mod relay;

pub use atomic_writer::AtomicJsonWriter;
pub use batch_writer::{export_file_name, write_chunk, BatchWriter, ChunkSize, WriteSummary};
pub use relay::{channel, RelayClosed, RelayReceiver, RelaySender};
