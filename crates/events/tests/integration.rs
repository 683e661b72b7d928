//! Integration tests for events

#[cfg(test)]
mod tests {
    use kiln_errors::{BuildError, UserFacingError};
    use kiln_events::*;
    use kiln_types::{PackageRef, Phase};

    fn zlib() -> PackageRef {
        PackageRef::parse("zlib/1.3.1").unwrap()
    }

    #[tokio::test]
    async fn test_event_sender_ext() {
        let (tx, mut rx) = channel();

        tx.emit_error("test error");
        tx.emit_debug("test debug");

        let first = rx.recv().await.unwrap();
        assert!(matches!(
            first.event,
            AppEvent::General(GeneralEvent::Error { .. })
        ));
        assert_eq!(first.meta.level, EventLevel::Error);

        let second = rx.recv().await.unwrap();
        assert!(matches!(
            second.event,
            AppEvent::General(GeneralEvent::DebugLog { .. })
        ));
        assert_eq!(second.meta.level, EventLevel::Debug);
    }

    #[tokio::test]
    async fn test_dropped_receiver() {
        let (tx, rx) = channel();
        drop(rx);

        // Should not panic when receiver is dropped
        tx.emit_warning("ignored");
    }

    #[test]
    fn test_levels_follow_event_severity() {
        let failed = AppEvent::Build(BuildEvent::NodeFailed {
            package: zlib(),
            phase: Some(Phase::Build),
            failure: FailureContext::new(Some("build.command_failed"), "make exited with 2", None::<String>, false),
        });
        assert_eq!(failed.log_level(), tracing::Level::ERROR);

        let skipped = AppEvent::Build(BuildEvent::NodeSkipped {
            package: zlib(),
            root_cause: Some("openssl/3.2.0".to_string()),
        });
        assert_eq!(skipped.log_level(), tracing::Level::WARN);

        let miss = AppEvent::Cache(CacheEvent::Miss {
            package: zlib(),
            fingerprint: "ab".repeat(32),
        });
        assert_eq!(miss.log_level(), tracing::Level::DEBUG);
        assert_eq!(miss.log_target(), "kiln::events::cache");

        let output = AppEvent::Build(BuildEvent::CommandOutput {
            package: zlib(),
            line: "CC adler32.o".to_string(),
            is_stderr: false,
        });
        assert_eq!(output.log_level(), tracing::Level::TRACE);
    }

    #[test]
    fn test_failure_context_from_error() {
        let error = BuildError::SourceFetch {
            package: "zlib/1.3.1".to_string(),
            url: "https://zlib.net/zlib-1.3.1.tar.gz".to_string(),
            message: "connection reset".to_string(),
        };
        let context = FailureContext::from_error(&error);
        assert_eq!(context.code.as_deref(), Some("build.source_fetch"));
        assert_eq!(context.message, error.user_message());
        assert!(context.hint.is_some());
        assert!(context.retryable);
    }

    #[test]
    fn test_message_serialization() {
        let message = EventMessage::correlated(
            AppEvent::Cache(CacheEvent::Hit {
                package: zlib(),
                fingerprint: "cd".repeat(32),
            }),
            "zlib/1.3.1",
        );
        let json = serde_json::to_value(&message).unwrap();
        assert_eq!(json["meta"]["correlationId"], "zlib/1.3.1");
        assert_eq!(json["meta"]["level"], "info");
        assert_eq!(json["meta"]["source"], "cache");
        assert_eq!(json["event"]["domain"], "cache");
        assert_eq!(json["event"]["event"]["type"], "Hit");
        assert_eq!(json["event"]["event"]["package"], "zlib/1.3.1");

        let back: EventMessage = serde_json::from_value(json).unwrap();
        assert!(matches!(back.event, AppEvent::Cache(CacheEvent::Hit { .. })));
    }
}
