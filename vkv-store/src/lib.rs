mod checkpoint;
mod kernel;
mod record;

pub use checkpoint::{CheckpointMetadata, CheckpointMode, CheckpointToken, ResolvedMode};
pub use kernel::{ReadOutcome, StoreKernel};
pub use record::Record;
