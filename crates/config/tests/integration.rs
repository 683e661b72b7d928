//! Integration tests for config

#[cfg(test)]
mod tests {
    use kiln_config::*;
    use kiln_types::{ColorChoice, OutputFormat};
    use std::io::Write;
    use std::path::PathBuf;
    use std::sync::Mutex;
    use tempfile::NamedTempFile;

    // Mutex to ensure env var tests don't run concurrently
    static ENV_TEST_MUTEX: Mutex<()> = Mutex::new(());

    const ENV_VARS: &[&str] = &[
        "KILN_OUTPUT",
        "KILN_COLOR",
        "KILN_JOBS",
        "KILN_STRICT_TESTS",
        "KILN_FETCH_RETRIES",
        "KILN_CACHE_DIR",
        "KILN_RECIPE_PATH",
    ];

    fn clear_env() {
        for var in ENV_VARS {
            std::env::remove_var(var);
        }
    }

    #[tokio::test]
    async fn test_load_config_from_file() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(
            temp_file,
            r#"
[general]
default_output = "plain"
color = "never"

[build]
jobs = 4
strict_tests = true
fetch_retries = 5

[paths]
cache_dir = "/tmp/kiln-cache"
recipe_dirs = ["/srv/recipes"]
        "#
        )
        .unwrap();

        let config = Config::load_from_file(temp_file.path()).await.unwrap();
        assert_eq!(config.general.default_output, OutputFormat::Plain);
        assert_eq!(config.general.color, ColorChoice::Never);
        assert_eq!(config.build.jobs, 4);
        assert!(config.build.strict_tests);
        assert_eq!(config.build.fetch_retries, 5);
        assert_eq!(config.build.retry_delay, 1);
        assert_eq!(config.cache_dir(), PathBuf::from("/tmp/kiln-cache"));
        assert_eq!(config.recipe_dirs(), vec![PathBuf::from("/srv/recipes")]);
    }

    #[tokio::test]
    async fn test_missing_file_is_not_found() {
        let err = Config::load_from_file(std::path::Path::new("/nonexistent/kiln.toml"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            kiln_errors::Error::Config(kiln_errors::ConfigError::Unreadable { .. })
        ));
        assert!(err.to_string().contains("/nonexistent/kiln.toml"));
    }

    #[tokio::test]
    async fn test_invalid_toml_is_parse_error() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(temp_file, "[build\njobs = ").unwrap();
        let err = Config::load_from_file(temp_file.path()).await.unwrap_err();
        assert!(matches!(
            err,
            kiln_errors::Error::Config(kiln_errors::ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn test_merge_env() {
        let _guard = ENV_TEST_MUTEX.lock().unwrap();
        clear_env();

        std::env::set_var("KILN_OUTPUT", "json");
        std::env::set_var("KILN_COLOR", "always");
        std::env::set_var("KILN_JOBS", "3");
        std::env::set_var("KILN_STRICT_TESTS", "yes");
        std::env::set_var("KILN_CACHE_DIR", "/var/cache/kiln");
        std::env::set_var("KILN_RECIPE_PATH", "/a:/b");

        let mut config = Config::default();
        config.paths.recipe_dirs.push(PathBuf::from("/c"));
        config.merge_env().unwrap();

        assert_eq!(config.general.default_output, OutputFormat::Json);
        assert_eq!(config.general.color, ColorChoice::Always);
        assert_eq!(config.build_jobs(), 3);
        assert!(config.build.strict_tests);
        assert_eq!(config.cache_dir(), PathBuf::from("/var/cache/kiln"));
        assert_eq!(
            config.recipe_dirs(),
            vec![
                PathBuf::from("/a"),
                PathBuf::from("/b"),
                PathBuf::from("/c")
            ]
        );

        clear_env();
    }

    #[test]
    fn test_merge_env_rejects_bad_values() {
        let _guard = ENV_TEST_MUTEX.lock().unwrap();
        clear_env();

        std::env::set_var("KILN_JOBS", "many");
        let mut config = Config::default();
        let err = config.merge_env().unwrap_err();
        assert!(err.to_string().contains("KILN_JOBS"));

        clear_env();
        std::env::set_var("KILN_STRICT_TESTS", "perhaps");
        let err = Config::default().merge_env().unwrap_err();
        assert!(err.to_string().contains("KILN_STRICT_TESTS"));

        clear_env();
    }
}
