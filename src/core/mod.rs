pub mod bridge;
pub mod capabilities;
pub mod config;
pub mod diag;
pub mod error;
pub mod translate;
pub mod vfs;
