pub mod config;
pub mod error;
pub mod types;

pub use error::{CvError, CvResult};
pub use types::{FileRecord, RangeRequest};
