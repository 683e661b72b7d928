//! Integration tests for error types

#[cfg(test)]
mod tests {
    use kiln_errors::*;

    #[test]
    fn test_error_conversion() {
        let err: Error = RecipeError::Duplicate {
            name: "zlib".into(),
            version: "1.3.1".into(),
        }
        .into();
        assert!(matches!(err, Error::Recipe(_)));
        assert!(!err.is_resolution());

        let err: Error = ResolveError::ToolCycle {
            path: vec!["cmake/3.28.1".into(), "openssl/3.2.0".into(), "cmake/3.28.1".into()],
        }
        .into();
        assert!(err.is_resolution());
        assert_eq!(err.user_code(), Some("resolve.tool_cycle"));
    }

    #[test]
    fn test_error_display() {
        let err = BuildError::UnsupportedPlatform {
            package: "metal-cpp/1.0".into(),
            phase: "build".into(),
            os: "linux".into(),
        };
        assert_eq!(err.to_string(), "metal-cpp/1.0 has no build branch for platform linux");
        assert_eq!(err.package(), "metal-cpp/1.0");
        assert_eq!(err.user_code(), Some("build.unsupported_platform"));
    }

    #[test]
    fn test_command_failure_message_keeps_stderr_tail() {
        let stderr: String = (1..=8).map(|i| format!("line {i}\n")).collect();
        let err = BuildError::CommandFailed {
            package: "zlib/1.3.1".into(),
            phase: "build".into(),
            command: "make".into(),
            exit_code: Some(2),
            stderr,
        };
        let message = err.user_message();
        assert!(message.starts_with("command `make` exited with Some(2)"));
        assert!(message.contains("line 8"));
        assert!(message.contains("line 4"));
        assert!(!message.contains("line 3"));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_test_failures_are_classified() {
        let err: Error = BuildError::TestFailed {
            package: "glfw/3.4".into(),
            message: "example exited with 1".into(),
        }
        .into();
        assert!(err.is_test_failure());
        assert_eq!(err.user_code(), Some("build.test_failed"));
        assert!(!Error::Cancelled.is_test_failure());
    }

    #[test]
    fn test_error_clone() {
        let err: Error = CacheError::NotFound {
            fingerprint: "ab12".into(),
        }
        .into();
        let cloned = err.clone();
        assert_eq!(err.to_string(), cloned.to_string());
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "test");
        let err: Error = io_err.into();
        assert!(matches!(
            err,
            Error::Io {
                kind: std::io::ErrorKind::PermissionDenied,
                path: None,
                ..
            }
        ));
        assert!(err.is_retryable());
        assert_eq!(err.user_code(), Some("error.io"));
    }

    #[test]
    fn test_yaml_errors_become_recipe_parse_errors() {
        let yaml_err = serde_yml::from_str::<Vec<String>>("- [unclosed").unwrap_err();
        let err: Error = yaml_err.into();
        assert_eq!(err.user_code(), Some("recipe.parse"));
    }
}
