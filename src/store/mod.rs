pub mod memory;
pub mod repository;
pub mod traits;

pub use memory::*;
pub use repository::*;
pub use traits::*;
