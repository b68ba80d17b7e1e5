pub mod access;
pub mod answer;
pub mod auth;
pub mod block;
pub mod db;
pub mod document;
pub mod error;
pub mod events;
pub mod item;
pub mod plugin;
pub mod readmark;
pub mod snapshot;
pub mod user;

pub use error::{Result, TimError};
