//! Safe SQL builder: identifiers from metadata only, values as parameters.

mod builder;
pub mod expr;
pub mod params;
pub use builder::*;
pub use expr::*;
pub use params::*;
