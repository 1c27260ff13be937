pub mod error;
pub mod ops;
pub mod types;
pub mod value;

pub use error::{CtfError, ErrorKind};
pub use ops::Operator;
pub use types::*;
pub use value::*;
