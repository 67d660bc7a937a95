//! cv-storage: object store abstraction over OpenDAL
//!
//! The streaming engine only needs four primitives from a store: a streamed
//! put, a single ranged get, an idempotent delete, and an existence check.
//! [`ObjectStore`] is that seam; [`OpendalStore`] implements it for any
//! OpenDAL operator (S3-compatible, local fs, in-memory).

pub mod health;
pub mod object;
pub mod operator;

pub use health::check_health;
pub use object::{ByteStream, ObjectStore, OpendalStore};
pub use operator::{build_from_core_config, build_operator, S3Config};
