use thiserror::Error;

/// 单个可释放对象的释放失败记录
#[derive(Debug, Clone)]
pub struct DisposalFailure {
    /// 失败对象的类型名
    pub type_name: String,
    /// 底层错误信息
    pub message: String,
}

impl std::fmt::Display for DisposalFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.type_name, self.message)
    }
}

/// 作用域释放时收集到的全部失败
///
/// 释放过程不会因为单个对象失败而中断，所有失败在最后统一返回。
#[derive(Debug, Error)]
#[error("Disposal of scope '{scope}' finished with {} failure(s): {}", .failures.len(), join_failures(.failures))]
pub struct DisposalError {
    pub scope: String,
    pub failures: Vec<DisposalFailure>,
}

impl DisposalError {
    pub fn new(scope: impl Into<String>, failures: Vec<DisposalFailure>) -> Self {
        Self {
            scope: scope.into(),
            failures,
        }
    }

    pub fn len(&self) -> usize {
        self.failures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }
}

fn join_failures(failures: &[DisposalFailure]) -> String {
    failures
        .iter()
        .map(|f| f.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// 激活管线错误
#[derive(Debug, Error)]
pub enum ActivationError {
    #[error("Unresolved dependency '{requested}'. Request chain: {}", .chain.join(" -> "))]
    UnresolvedDependency {
        requested: String,
        chain: Vec<String>,
    },

    #[error("Circular dependency detected on '{requested}'. Request chain: {}", .chain.join(" -> "))]
    CircularDependency {
        requested: String,
        chain: Vec<String>,
    },

    #[error("Resolution depth {depth} exceeded the limit of {limit} while resolving '{requested}'")]
    DepthExceeded {
        requested: String,
        depth: usize,
        limit: usize,
    },

    #[error("Scope '{scope}' is closed")]
    ScopeClosed { scope: String },

    #[error("Type cast failed: expected '{expected}' in {context}")]
    TypeMismatch { expected: String, context: String },

    #[error("Failed to create '{service}': {source}")]
    CreationFailed {
        service: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("No value bound for argument slot {slot} of type '{type_name}'")]
    MissingArgument { type_name: String, slot: u64 },

    #[error(transparent)]
    Disposal(#[from] DisposalError),
}

impl ActivationError {
    /// Whether the error was caused by a closed scope.
    pub fn is_scope_closed(&self) -> bool {
        matches!(self, ActivationError::ScopeClosed { .. })
    }

    /// Request chain carried by resolution failures, root first.
    pub fn chain(&self) -> Option<&[String]> {
        match self {
            ActivationError::UnresolvedDependency { chain, .. }
            | ActivationError::CircularDependency { chain, .. } => Some(chain),
            _ => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read file '{0}': {1}")]
    FileRead(String, #[source] std::io::Error),
    #[error("Failed to parse TOML from file '{0}': {1}")]
    TomlParse(String, #[source] toml::de::Error),
    #[error("Invalid value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unresolved_message_contains_chain() {
        let err = ActivationError::UnresolvedDependency {
            requested: "Database".to_string(),
            chain: vec!["UserService".to_string(), "Database".to_string()],
        };
        let message = err.to_string();
        assert!(message.contains("UserService -> Database"));
        assert_eq!(err.chain().map(|c| c.len()), Some(2));
    }

    #[test]
    fn test_disposal_error_lists_failures() {
        let err = DisposalError::new(
            "root",
            vec![
                DisposalFailure {
                    type_name: "Conn".to_string(),
                    message: "socket busy".to_string(),
                },
                DisposalFailure {
                    type_name: "File".to_string(),
                    message: "locked".to_string(),
                },
            ],
        );
        assert_eq!(err.len(), 2);
        let message = err.to_string();
        assert!(message.contains("2 failure(s)"));
        assert!(message.contains("Conn: socket busy"));
        assert!(message.contains("File: locked"));
    }

    #[test]
    fn test_scope_closed_predicate() {
        let err = ActivationError::ScopeClosed {
            scope: "request".to_string(),
        };
        assert!(err.is_scope_closed());
        assert!(err.chain().is_none());
    }
}
