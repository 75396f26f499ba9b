//! Error types shared between the host and plug-in packages.

use thiserror::Error;

/// Boxed error type used for foreign causes.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors returned by [`PlugIn::execute`](crate::PlugIn::execute).
///
/// [`PlugInError::Cancelled`] is how a plug-in reports that it stopped
/// because its cancellation token fired. The host treats it as a normal
/// completion, never as a fault.
#[derive(Debug, Error)]
pub enum PlugInError {
    /// The workload observed its cancellation token and stopped.
    #[error("plug-in execution was cancelled")]
    Cancelled,

    /// The workload failed.
    #[error("{message}")]
    Failed {
        /// Human-readable description of the failure.
        message: String,
        /// Underlying cause, if any.
        #[source]
        source: Option<BoxError>,
    },
}

impl PlugInError {
    /// Creates a failure with a message and no underlying cause.
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a failure wrapping an underlying cause.
    pub fn with_source(
        message: impl Into<String>,
        source: impl Into<BoxError>,
    ) -> Self {
        Self::Failed {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// Returns `true` for [`PlugInError::Cancelled`].
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// Errors raised while a plug-in object is being constructed.
///
/// Names are owned: the error must stay valid after the package that raised
/// it has been unloaded.
#[derive(Debug, Clone, Error)]
pub enum BuildError {
    /// The stored configuration could not be materialised.
    #[error("invalid configuration for `{type_name}`: {reason}")]
    InvalidConfiguration {
        /// Name of the configuration type.
        type_name: String,
        /// Why the configuration was rejected.
        reason: String,
    },

    /// The plug-in factory refused to construct the object.
    #[error("failed to construct `{type_name}`: {reason}")]
    Construction {
        /// Name of the plug-in type.
        type_name: String,
        /// Why construction failed.
        reason: String,
    },
}

impl BuildError {
    /// Creates an [`InvalidConfiguration`](Self::InvalidConfiguration) error.
    pub fn invalid_configuration(type_name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidConfiguration {
            type_name: type_name.into(),
            reason: reason.into(),
        }
    }

    /// Creates a [`Construction`](Self::Construction) error.
    pub fn construction(type_name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Construction {
            type_name: type_name.into(),
            reason: reason.into(),
        }
    }
}

/// Result type for plug-in construction.
pub type BuildResult<T> = Result<T, BuildError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_error_owns_its_names() {
        let name = String::from("meter::Meter");
        let err = BuildError::construction(name.as_str(), "device is required");
        drop(name);
        assert_eq!(
            err.to_string(),
            "failed to construct `meter::Meter`: device is required"
        );
    }
}
