pub mod bus;
pub mod fake;

pub use bus::{EventBus, Message, PgEventBus};
pub use fake::FakeEventBus;
