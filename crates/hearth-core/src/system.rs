//! Host checks.

use regex::Regex;
use serde::Serialize;
use std::process::Command;
use std::sync::LazyLock;
use tracing::debug;

static JAVA_VERSION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"version "((\d+)(?:\.(\d+))?[^"]*)""#).unwrap());

/// Result of looking for a Java runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JavaCheckResult {
    pub installed: bool,
    /// Full version string, e.g. `21.0.2` or `1.8.0_392`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub major_version: Option<u32>,
    pub compatible: bool,
    pub required_version: u32,
}

/// Run `<java_bin> -version` and compare its major version with `required_major`.
pub fn check_java(java_bin: &str, required_major: u32) -> JavaCheckResult {
    let output = Command::new(java_bin).arg("-version").output();

    // `java -version` prints to stderr; some builds use stdout.
    let text = match output {
        Ok(output) => format!(
            "{}{}",
            String::from_utf8_lossy(&output.stderr),
            String::from_utf8_lossy(&output.stdout)
        ),
        Err(e) => {
            debug!("Could not run {}: {}", java_bin, e);
            String::new()
        }
    };

    evaluate_java_output(&text, required_major)
}

fn evaluate_java_output(text: &str, required_major: u32) -> JavaCheckResult {
    let parsed = parse_java_version(text);
    JavaCheckResult {
        installed: parsed.is_some(),
        compatible: parsed
            .as_ref()
            .is_some_and(|(_, major)| *major >= required_major),
        major_version: parsed.as_ref().map(|(_, major)| *major),
        version: parsed.map(|(version, _)| version),
        required_version: required_major,
    }
}

/// Extract the version string and major version from `java -version` output.
///
/// Legacy `1.x` numbering reports major version `x`.
pub fn parse_java_version(text: &str) -> Option<(String, u32)> {
    let caps = JAVA_VERSION.captures(text)?;
    let version = caps.get(1)?.as_str().to_string();
    let first: u32 = caps.get(2)?.as_str().parse().ok()?;
    let major = if first == 1 {
        caps.get(3)?.as_str().parse().ok()?
    } else {
        first
    };
    Some((version, major))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_modern_version() {
        let out = "openjdk version \"21.0.2\" 2024-01-16\nOpenJDK Runtime Environment";
        assert_eq!(parse_java_version(out), Some(("21.0.2".to_string(), 21)));
    }

    #[test]
    fn test_parse_legacy_version() {
        let out = "java version \"1.8.0_392\"\nJava(TM) SE Runtime Environment";
        assert_eq!(parse_java_version(out), Some(("1.8.0_392".to_string(), 8)));
    }

    #[test]
    fn test_parse_bare_major() {
        assert_eq!(
            parse_java_version("openjdk version \"24\" 2025-03-18"),
            Some(("24".to_string(), 24))
        );
    }

    #[test]
    fn test_garbage_is_not_installed() {
        let result = evaluate_java_output("bash: java: command not found", 21);
        assert!(!result.installed);
        assert!(!result.compatible);
        assert_eq!(result.required_version, 21);
    }

    #[test]
    fn test_compatibility() {
        let old = evaluate_java_output("java version \"1.8.0_392\"", 21);
        assert!(old.installed);
        assert!(!old.compatible);

        let new = evaluate_java_output("openjdk version \"21.0.2\"", 21);
        assert!(new.compatible);
        assert_eq!(new.major_version, Some(21));
    }

    #[test]
    fn test_missing_binary() {
        let result = check_java("/nonexistent/bin/java", 21);
        assert!(!result.installed);
    }
}
