mod config;
pub mod error;
pub mod helper;
pub mod model;
pub mod signal;

#[cfg(test)]
mod test_utils;

pub use error::{Error, Result};
pub use model::{EegNetV1, EegNetV1Config, EegNetV4, EegNetV4Config, FinalConvLength};
