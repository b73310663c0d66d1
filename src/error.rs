//! Error types for the Local Volume Coordinator
//!
//! Provides one structured error type for the store adapters, the
//! provisioning components and the coordinator surface.

use thiserror::Error;

/// Unified error type for the coordinator
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Internal Errors
    // =========================================================================
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    // =========================================================================
    // Store Errors
    // =========================================================================
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("Resource not found: {kind}/{name}")]
    ResourceNotFound { kind: String, name: String },

    #[error("Resource already exists: {kind}/{name}")]
    ResourceExists { kind: String, name: String },

    #[error("Resource version conflict on {kind}/{name}: {message}")]
    Conflict {
        kind: String,
        name: String,
        message: String,
    },

    #[error("Store request failed: {0}")]
    StoreTransient(String),

    #[error("Store unavailable: {operation} {kind}/{name} failed after {attempts} attempts: {source}")]
    StoreUnavailable {
        operation: String,
        kind: String,
        name: String,
        attempts: u32,
        source: Box<Error>,
    },

    // =========================================================================
    // Placement Errors
    // =========================================================================
    #[error("Thin pool {pool} not found in LVMVolumeGroup {group}")]
    PoolNotFound { group: String, pool: String },

    #[error("No eligible LVMVolumeGroup: {reason}")]
    NoEligibleTarget { reason: String },

    // =========================================================================
    // Convergence Errors
    // =========================================================================
    #[error("Failed to create logical volume for LVMLogicalVolume {volume}, reason: {reason}")]
    VolumeFailed { volume: String, reason: String },

    #[error("LVMLogicalVolume {volume} is being deleted while waiting for it")]
    ConflictingDeletion { volume: String },

    #[error("Operation on LVMLogicalVolume {volume} canceled after {attempts} attempts")]
    Canceled { volume: String, attempts: u32 },

    #[error("LVMLogicalVolume {volume} did not converge after {attempts} attempts")]
    ConvergenceTimeout { volume: String, attempts: u32 },

    #[error("Failed to remove finalizer {token} from LVMLogicalVolume {volume} after {attempts} attempts, last error: {source}")]
    FinalizerRetriesExhausted {
        volume: String,
        token: String,
        attempts: u32,
        source: Box<Error>,
    },

    // =========================================================================
    // Parse Errors
    // =========================================================================
    #[error("Capacity parse error: {0}")]
    CapacityParse(String),

    #[error("Storage class parameter parse error: {0}")]
    ParameterParse(#[from] serde_yaml::Error),

    // =========================================================================
    // IO Errors
    // =========================================================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Check if this error is transient and worth another store round trip
    pub fn is_transient(&self) -> bool {
        match self {
            Error::StoreTransient(_) => true,
            Error::Kube(kube::Error::Api(ae)) => ae.code == 429 || ae.code >= 500,
            Error::Kube(kube::Error::HyperError(_)) | Error::Kube(kube::Error::Service(_)) => {
                true
            }
            _ => false,
        }
    }

    /// Check if this error is an optimistic-concurrency conflict
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::Conflict { .. })
    }

    /// Check if this error reports a missing resource
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::ResourceNotFound { .. })
    }

    /// Check if the caller may retry the whole operation later
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::StoreUnavailable { .. }
            | Error::Conflict { .. }
            | Error::FinalizerRetriesExhausted { .. }
            | Error::ConvergenceTimeout { .. }
            | Error::NoEligibleTarget { .. } => true,
            other => other.is_transient(),
        }
    }
}

/// Result type alias for the coordinator
pub type Result<T> = std::result::Result<T, Error>;
