mod channel;
pub mod executor;
pub mod trigger;

pub use channel::{Channel, ChannelEvent, ChannelOptions};
pub use executor::{Executor, GraphCache};
pub use trigger::TriggerRouter;
