//! Per-request authorization material and the access-token model behind it.

pub mod authorizer;
pub mod token;

pub use authorizer::*;
pub use token::{record::*, secret::*};
