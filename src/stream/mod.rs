pub mod connection;
pub mod session;
pub mod timer;

pub use connection::{ConnectionManager, StreamEvent, Visibility};
pub use session::{FeedHandle, FeedSession};
pub use timer::DebounceTimer;
