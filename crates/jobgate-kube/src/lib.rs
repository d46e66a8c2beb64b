//! Kubernetes implementation of [`jobgate_core::ExecutionBackend`].

mod client;
mod config;
mod error;
mod kubeconfig;
mod template;

pub use client::KubeBackend;
pub use config::{ClientIdentity, DEFAULT_REQUEST_TIMEOUT, KubeConfig};
pub use error::KubeError;
pub use template::{DEFAULT_IMAGE, DEFAULT_SCRIPT, JobTemplate};
