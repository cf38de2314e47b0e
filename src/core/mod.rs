pub mod config;
pub mod frame;
pub mod io;
pub mod schema;
pub mod value;

// Re-export commonly used types
pub use config::{Capability, EngineConfig};
pub use frame::{Frame, FrameOptions, Row};
pub use schema::{Field, Schema};
pub use value::{DType, Document, Value};
