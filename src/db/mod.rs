mod repository;
mod schema;
mod transaction;

pub use repository::{Repository, StatusCounts};
pub use transaction::RetryPolicy;
