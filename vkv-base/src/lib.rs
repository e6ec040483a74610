mod clock;
mod error;
mod ids;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{
    err, err_auth, err_cluster, err_command, err_fatal, err_kind, err_parse, Error, ErrorKind,
    Result,
};
pub use ids::{Address, NodeId, SessionId, Version};
