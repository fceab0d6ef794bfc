//! Language-model backends for the classifier

mod cli_model;

pub use cli_model::{CliRoutingModel, ModelClientConfig};
