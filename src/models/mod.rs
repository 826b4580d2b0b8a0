pub mod column;
pub mod datasource;
pub mod filter;
pub mod introspection;
pub mod query;

pub use column::*;
pub use datasource::*;
pub use filter::*;
pub use introspection::*;
pub use query::*;
