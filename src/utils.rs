pub mod duration;
pub mod error;
pub mod logging;

pub use self::error::AppError;
