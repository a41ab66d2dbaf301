//! Core types for the mapping pipeline

mod value;
mod record;
mod mapping;
mod key_spec;
mod path;

pub use value::*;
pub use record::*;
pub use mapping::*;
pub use key_spec::*;
pub use path::*;
