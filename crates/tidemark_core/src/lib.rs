pub mod api;
pub mod error;
pub mod frame;
pub mod ids;
pub mod level;
pub mod query;
pub mod schema;
pub mod schema_manifest;
pub mod timestamp;
pub mod value;

pub use api::*;
pub use error::{TidemarkError, TidemarkResult};
pub use frame::*;
pub use ids::*;
pub use level::*;
pub use query::*;
pub use schema::*;
pub use schema_manifest::*;
pub use timestamp::*;
pub use value::*;
