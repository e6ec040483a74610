mod buffer_pool;
mod device;

pub use buffer_pool::{round_up_to_sector, BufferPool, PinnedBuffer, SECTOR_SIZE};
pub use device::{Device, FileDevice, MemDevice, SegmentId};
