//! Chat transports: where events come from and where output goes.

pub mod memory;
pub mod telegram;
pub mod transport;

pub use memory::{Delivery, MemoryTransport};
pub use telegram::TelegramTransport;
pub use transport::{Conversation, EventStream, Transport};
