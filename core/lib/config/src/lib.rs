pub use crate::configs::*;

pub mod configs;
