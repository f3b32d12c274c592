//! Sample records, rolling storage and snapshot persistence.
pub mod compact;
pub mod record;
pub mod ring_buffer;
pub mod storage;
pub mod window;
