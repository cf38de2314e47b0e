pub mod filter;
pub mod mongoq;
pub mod ops;

pub use filter::Filter;
pub use mongoq::{Combinator, MongoQ};
