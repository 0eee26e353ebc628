use thiserror::Error;

use crate::{
    config::LoadError,
    infra::{error::InfraError, http::PolicyError},
    presentation::TemplateError,
};

#[derive(Debug, Error)]
pub enum AppError {
    #[error("failed to load configuration: {0}")]
    Config(#[from] LoadError),
    #[error(transparent)]
    Infra(#[from] InfraError),
    #[error("invalid response header policy: {0}")]
    Policy(#[from] PolicyError),
    #[error("template environment failed to initialize: {0}")]
    Templates(#[from] TemplateError),
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl AppError {
    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::Unexpected(message.into())
    }
}
