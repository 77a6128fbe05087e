pub mod cache;
pub mod fake;

pub use cache::{Cache, RedisCache};
pub use fake::FakeCache;
