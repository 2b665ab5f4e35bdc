mod error;
pub mod models;
pub mod var_builder;

pub use error::ModelError;

pub type Res<T> = std::result::Result<T, ModelError>;
