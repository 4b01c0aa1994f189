mod query_type;
#[macro_use]
mod escape;

pub use query_type::QueryType;
pub use escape::*;
