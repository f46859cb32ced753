pub mod class_map;
pub mod config;
pub mod dataset;
pub mod error;
pub mod inference;
pub mod landmarks;
pub mod logging;
pub mod model;
pub mod normalize;
pub mod protocol;
pub mod server;

pub use error::GestureError;
