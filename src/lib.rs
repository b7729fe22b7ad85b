pub mod apk;
pub mod cache;
pub mod checksum;
pub mod error;
pub mod merge;
pub mod metadata;
pub mod model;
pub mod pipeline;
pub mod prepare;
pub mod remote;
pub mod resolve;
pub mod select;
pub mod store;
pub mod sync;

#[cfg(test)]
#[path = "tests/support.rs"]
mod test_support;
