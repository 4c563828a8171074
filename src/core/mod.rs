pub mod discovery;
pub mod feed;
pub mod sanitize;
pub mod storage;
pub mod subscription;
pub mod sync;
