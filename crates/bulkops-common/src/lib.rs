pub mod error;

pub use error::{BulkopsError, Result};
