pub mod follow;
pub mod posts;
pub mod system;
pub mod timeline;
