mod record;
mod replayer;
mod writer;

pub use record::{read_frame, write_frame, AofRecord, OpType, HEADER_LEN};
pub use replayer::{ReplayStats, Replayer};
pub use writer::AofWriter;
