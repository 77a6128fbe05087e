pub mod fake;
pub mod store;

pub use fake::FakeStore;
pub use store::{PgStore, Store};
