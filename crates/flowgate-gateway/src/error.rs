//! `flowgate-gateway` runtime error type.
//!
//! [`GatewayImplError`] covers failures that occur while the gateway is
//! running: admin conflicts, routing misses, socket errors.  Definition-time
//! failures (malformed specs, invalid flows, …) are represented by
//! [`flowgate_kernel::PipelineError`] and live in the kernel crate.

use flowgate_kernel::PipelineError;
use std::net::SocketAddr;
use thiserror::Error;

/// Runtime error type for `flowgate-gateway`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum GatewayImplError {
    /// A submitted pipeline spec failed parsing or validation.
    #[error(transparent)]
    InvalidSpec(#[from] PipelineError),

    /// A pipeline with this name already exists.
    #[error("pipeline '{0}' already exists")]
    PipelineExists(String),

    /// No pipeline with this name is registered.
    #[error("pipeline '{0}' not found")]
    PipelineNotFound(String),

    /// The name in the request path disagrees with the spec body.
    #[error("path names pipeline '{path}' but spec names '{body}'")]
    SpecNameMismatch { path: String, body: String },

    /// Binding the listen socket failed.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// The HTTP server loop failed.
    #[error("server error: {0}")]
    Serve(#[source] std::io::Error),
}

/// Convenience alias.
pub type GatewayResult<T> = Result<T, GatewayImplError>;
