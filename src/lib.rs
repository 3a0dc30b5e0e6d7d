extern crate self as hookwire;

pub mod aslr;
pub mod api;
pub mod config;
pub mod error;
pub mod events;
pub mod hooks;
pub mod image;
pub mod metrics;
pub mod services;
pub mod stack;
pub mod tasks;

pub use error::{BoxError, Error, Result};
pub use services::Services;

pub use hookwire_macro::entry_point;

pub use once_cell;
