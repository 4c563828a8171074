pub mod buffer;
pub mod models;
pub mod repository;
