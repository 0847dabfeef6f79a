pub mod normalize;
pub mod types;

pub use normalize::{normalize_events, RawChatEvent};
pub use types::Message;
