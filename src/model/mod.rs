pub mod application;
pub mod common;
pub mod entity;
pub mod image;
pub mod instance;
pub mod patch;
pub mod schema;
pub mod service;
pub mod state;
pub mod user_context;

pub use application::*;
pub use common::*;
pub use entity::*;
pub use image::*;
pub use instance::*;
pub use patch::*;
pub use service::*;
pub use state::*;
pub use user_context::*;
