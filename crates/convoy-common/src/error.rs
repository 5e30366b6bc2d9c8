//! Error types for Convoy
//!
//! `ConvoyError` covers the three failure families of a build:
//! - store errors, wrapped with the resource kind and scope
//! - resolution errors in the declared configuration
//! - address lookup errors

/// Result alias used across the engine
pub type Result<T, E = ConvoyError> = std::result::Result<T, E>;

/// Application-specific error types
#[derive(thiserror::Error, Debug)]
pub enum ConvoyError {
    #[error("failed to {op} {kind}{scope}: {source}")]
    Store {
        op: &'static str,
        kind: String,
        scope: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("{kind} {key} not found")]
    NotFound { kind: String, key: String },

    #[error("outbound interface [{index}]{{service={service:?}}} has no TrafficRoute")]
    MissingTrafficRoute { index: usize, service: String },

    #[error("outbound interface [{index}] is malformed: {reason}")]
    MalformedOutbound { index: usize, reason: String },

    #[error("profile{{name={0:?}}}: unknown profile")]
    UnknownProfile(String),

    #[error("raw.resources[{index}]{{name={name:?}}}.resource: {reason}")]
    InvalidRawResource {
        index: usize,
        name: String,
        reason: String,
    },

    #[error("could not resolve address {host:?}: {source}")]
    Lookup {
        host: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("generator {generator} cannot handle a {kind} proxy")]
    UnsupportedProxy {
        generator: &'static str,
        kind: &'static str,
    },

    #[error("validation error: {0}")]
    Validation(String),

    #[error("{context}: {source}")]
    Generator {
        context: String,
        #[source]
        source: Box<ConvoyError>,
    },
}

impl ConvoyError {
    /// Annotate an error with the location that produced it
    pub fn annotate(self, context: impl Into<String>) -> Self {
        ConvoyError::Generator {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Walk through annotations to the error that caused them
    pub fn root(&self) -> &ConvoyError {
        match self {
            ConvoyError::Generator { source, .. } => source.root(),
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_route_message_names_index() {
        let err = ConvoyError::MissingTrafficRoute {
            index: 2,
            service: "backend".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "outbound interface [2]{service=\"backend\"} has no TrafficRoute"
        );
    }

    #[test]
    fn test_annotation_keeps_root() {
        let err = ConvoyError::UnknownProfile("custom".to_string())
            .annotate("imports[0]{name=\"custom\"}")
            .annotate("generators[0]{name=\"template\"}");

        assert!(err.to_string().starts_with("generators[0]"));
        assert!(matches!(err.root(), ConvoyError::UnknownProfile(name) if name == "custom"));
    }

    #[test]
    fn test_store_error_carries_scope() {
        let err = ConvoyError::Store {
            op: "list",
            kind: "Dataplane".to_string(),
            scope: " in mesh \"m1\"".to_string(),
            source: anyhow::anyhow!("connection refused"),
        };
        assert_eq!(
            err.to_string(),
            "failed to list Dataplane in mesh \"m1\": connection refused"
        );
    }
}
