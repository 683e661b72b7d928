//! Integration tests for types

#[cfg(test)]
mod tests {
    use kiln_types::*;
    use std::str::FromStr;

    #[test]
    fn test_package_ref_parsing() {
        let reference = PackageRef::from_str("vulkan-headers/1.4.304.0").unwrap();
        assert_eq!(reference.name, "vulkan-headers");
        assert_eq!(reference.version.as_str(), "1.4.304.0");
        assert_eq!(reference.to_string(), "vulkan-headers/1.4.304.0");

        assert!(PackageRef::parse("zlib").is_err());
        assert!(PackageRef::parse("Zlib/1.3.1").is_err());
        assert!(PackageRef::parse("zlib/[>=1.2 <2]").is_err());
        assert!(PackageRef::parse("zlib/1.3 1").is_err());
    }

    #[test]
    fn test_version_ordering_is_numeric_per_segment() {
        let mut versions: Vec<Version> = ["1.10.0", "1.2.0", "1.9", "1.9.1"]
            .iter()
            .map(|v| Version::parse(v).unwrap())
            .collect();
        versions.sort();
        let labels: Vec<_> = versions.iter().map(Version::as_str).collect();
        assert_eq!(labels, vec!["1.2.0", "1.9", "1.9.1", "1.10.0"]);
    }

    #[test]
    fn test_requirement_builders() {
        let zlib = PackageRef::parse("zlib/1.3.1").unwrap();
        let requirement = Requirement::link(zlib.clone()).with_option("shared", "True");
        assert_eq!(requirement.kind, RequirementKind::Link);
        assert_eq!(requirement.name(), "zlib");
        assert_eq!(requirement.options.get("shared").map(String::as_str), Some("True"));
        assert!(!requirement.is_override);

        let pinned = Requirement::link(zlib).as_override();
        assert!(pinned.is_override);

        let tool = Requirement::tool(PackageRef::parse("cmake/3.28.1").unwrap());
        assert_eq!(tool.kind, RequirementKind::Tool);
    }

    #[test]
    fn test_arch_serialization() {
        let arch = Arch::Armv8;
        let json = serde_json::to_string(&arch).unwrap();
        assert_eq!(json, r#""armv8""#);

        let alias: Arch = serde_json::from_str(r#""aarch64""#).unwrap();
        assert_eq!(alias, arch);

        let unknown: Arch = serde_json::from_str(r#""riscv64""#).unwrap();
        assert_eq!(unknown, Arch::Other("riscv64".to_string()));
    }

    #[test]
    fn test_tool_settings_target_the_host() {
        let cross = Settings::host()
            .with_os(Os::Ios)
            .with_arch(Arch::Armv8)
            .with_build_type(BuildType::Debug);
        let tools = cross.for_tools();
        assert_eq!(tools.os, Os::host());
        assert_eq!(tools.arch, Arch::host());
        assert_eq!(tools.build_type, BuildType::Release);
        assert!(tools.can_run());
    }

    #[test]
    fn test_settings_from_yaml_fill_defaults() {
        let settings: Settings =
            serde_yml::from_str("os: linux\narch: x86_64\ncompiler:\n  name: gcc\n").unwrap();
        assert_eq!(settings.os, Os::Linux);
        assert_eq!(settings.build_type, BuildType::Release);
        assert_eq!(settings.compiler.cppstd, 17);
        assert_eq!(settings.compiler.version, None);
    }

    #[test]
    fn test_report_json_shape() {
        let report = BuildReport {
            run_id: Uuid::nil(),
            started_at: chrono::Utc::now(),
            nodes: vec![NodeReport {
                package: PackageRef::parse("app/1.0").unwrap(),
                context: NodeContext::Target,
                fingerprint: None,
                state: NodeState::Skipped(SkipReason::UpstreamFailure {
                    root_cause: "zlib/1.3.1".to_string(),
                }),
                test: TestOutcome::NotRun,
                duration_ms: 0,
            }],
            duration_ms: 5,
        };
        let json = serde_json::to_value(&report).unwrap();
        let node = &json["nodes"][0];
        assert_eq!(node["package"], "app/1.0");
        assert_eq!(node["state"], "skipped");
        assert_eq!(node["reason"], "upstream_failure");
        assert_eq!(node["root_cause"], "zlib/1.3.1");
        assert_eq!(node["test"]["outcome"], "not_run");
        assert!(!report.is_success());
        assert_eq!(report.summary().skipped, 1);
    }

    #[test]
    fn test_output_format_default() {
        assert_eq!(OutputFormat::default(), OutputFormat::Tty);
        assert_eq!(ColorChoice::default(), ColorChoice::Auto);
    }
}
