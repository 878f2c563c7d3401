pub mod broadcaster;
pub mod messages;
pub mod socket;

pub use broadcaster::{Broadcaster, BroadcasterHandle};
pub use messages::ServerMessage;
