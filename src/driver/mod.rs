pub mod protocol;
pub mod query;
