pub mod error;
pub mod models;
pub mod progress;
pub mod rotation;
pub mod store;

pub use error::*;
pub use models::*;
pub use progress::*;
pub use rotation::*;
pub use store::*;
