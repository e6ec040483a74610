//! RESP v2 wire protocol: frame parsing/encoding (`frame`), the core
//! data-command dispatcher (`dispatch`), and the per-connection
//! pipelined session state machine (`session`) -- spec.md §4.7.

pub mod dispatch;
pub mod frame;
pub mod session;

pub use dispatch::{CommandHandler, Dispatcher};
pub use frame::Frame;
pub use session::Session;
