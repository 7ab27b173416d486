//! Error types for shortcut orchestration
//!
//! Every failure is fatal to the current operation. A convergence timeout is
//! not represented here: it is a normal [`crate::convergence::Convergence`]
//! outcome.

use thiserror::Error;

/// Result alias used across the library
pub type Result<T> = std::result::Result<T, ShortcutError>;

/// Errors that can occur while managing shortcuts and fleet access
#[derive(Debug, Error)]
pub enum ShortcutError {
    /// The primary cluster's control surface cannot be reached or configured
    #[error("configuration error: {0}")]
    Config(String),

    /// A required resource type is not served by the cluster
    #[error("resource type {resource} is not registered in the cluster")]
    Schema { resource: String },

    /// A named foreign cluster is not registered
    #[error("foreign cluster {name:?} not found")]
    EndpointNotFound { name: String },

    /// No declaration links the two endpoints
    #[error("no connection declaration found between {endpoint_a:?} and {endpoint_b:?}")]
    DeclarationNotFound {
        endpoint_a: String,
        endpoint_b: String,
    },

    /// A declaration disappeared while it was being watched
    #[error("connection {namespace}/{name} disappeared while waiting for convergence")]
    DeclarationGone { namespace: String, name: String },

    /// The derived name is taken by a declaration for a different pair
    #[error("connection {namespace}/{name} already exists for a different pair of clusters")]
    AlreadyExists { namespace: String, name: String },

    /// A list/get/create/delete call against a cluster failed
    #[error("{operation} failed: {source}")]
    RemoteApi {
        operation: String,
        #[source]
        source: kube::Error,
    },

    /// The bootstrap credential secret does not exist
    #[error("credential secret {namespace}/{name} not found")]
    SecretNotFound { namespace: String, name: String },

    /// The bootstrap credential payload could not be decoded
    #[error("cannot decode credential for {cluster}: {reason}")]
    Decode { cluster: String, reason: String },

    /// Policy or manifest submission failed
    #[error("apply on {target} failed: {reason}")]
    RemoteApply { target: String, reason: String },

    /// Local filesystem failure while materializing a credential
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ShortcutError {
    pub fn config(message: impl Into<String>) -> Self {
        ShortcutError::Config(message.into())
    }

    pub fn remote_apply(target: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        ShortcutError::RemoteApply {
            target: target.into(),
            reason: reason.to_string(),
        }
    }

    /// Wrap a kube error for `operation`.
    pub fn remote(operation: impl Into<String>, source: kube::Error) -> Self {
        ShortcutError::RemoteApi {
            operation: operation.into(),
            source,
        }
    }

    /// Map the error of listing `resource`: a 404 means the type itself is missing.
    pub fn from_list(resource: &str, source: kube::Error) -> Self {
        match api_code(&source) {
            Some(404) => ShortcutError::Schema {
                resource: resource.to_string(),
            },
            _ => Self::remote(format!("list {}", resource), source),
        }
    }
}

/// HTTP status of an API error response, if the error carries one.
pub fn api_code(err: &kube::Error) -> Option<u16> {
    match err {
        kube::Error::Api(response) => Some(response.code),
        _ => None,
    }
}
