//! ---
//! tbh_section: "06-sequencing"
//! tbh_subsection: "module"
//! tbh_type: "source"
//! tbh_scope: "code"
//! tbh_description: "Command lines for the reference engine and the test binary."
//! tbh_version: "v0.1.0"
//! tbh_owner: "tbd"
//! ---
use tbh_common::HarnessConfig;
use tbh_process::LaunchSpec;

/// Role label of the reference engine in logs and failure reports.
pub const REFERENCE_LABEL: &str = "reference-engine";

/// Role label of a test binary launched for `label`.
pub fn test_binary_label(label: &str) -> String {
    format!("test-binary:{label}")
}

/// Launch spec for the reference engine listening on `port`.
pub fn reference_engine(config: &HarnessConfig, port: u16) -> LaunchSpec {
    let spec = LaunchSpec::new(REFERENCE_LABEL, &config.binaries.reference_engine).args([
        "--driver".to_string(),
        config.fixture.audio_driver.clone(),
        "-s".to_string(),
        config.fixture.song.display().to_string(),
        "-O".to_string(),
        port.to_string(),
        "-L".to_string(),
        config.artifacts.reference_log.display().to_string(),
        "-T".to_string(),
        "-V".to_string(),
        config.fixture.verbosity.clone(),
    ]);
    match config.artifacts.reference_output_path() {
        Some(path) => spec.capture_to(path),
        None => spec,
    }
}

/// Launch spec for the test binary driving scenario artifact `label` on `port`.
pub fn test_binary(config: &HarnessConfig, label: &str, port: u16) -> LaunchSpec {
    let spec = LaunchSpec::new(test_binary_label(label), &config.binaries.test_binary).args([
        "-L".to_string(),
        config.artifacts.test_log_path(label).display().to_string(),
        "-s".to_string(),
        config.fixture.song.display().to_string(),
        "-O".to_string(),
        port.to_string(),
        "-V".to_string(),
        config.fixture.verbosity.clone(),
    ]);
    match config.artifacts.test_output_path(label) {
        Some(path) => spec.capture_to(path),
        None => spec,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn reference_engine_command_line() {
        let config = HarnessConfig::default();
        let spec = reference_engine(&config, 9099);
        assert_eq!(spec.label, "reference-engine");
        assert_eq!(spec.program, config.binaries.reference_engine);
        assert_eq!(
            spec.args,
            vec![
                "--driver",
                "jack",
                "-s",
                "jackTimebaseTest.h2song",
                "-O",
                "9099",
                "-L",
                "./hydrogen.log",
                "-T",
                "-V",
                "Debug"
            ]
        );
        assert_eq!(spec.capture, Some(PathBuf::from("./hydrogen.output.log")));
    }

    #[test]
    fn test_binary_command_line_names_logs_by_label() {
        let mut config = HarnessConfig::default();
        let spec = test_binary(&config, "bbt-relocation-listener", 8100);
        assert_eq!(spec.label, "test-binary:bbt-relocation-listener");
        assert_eq!(
            spec.args,
            vec![
                "-L",
                "./test-bbt-relocation-listener.log",
                "-s",
                "jackTimebaseTest.h2song",
                "-O",
                "8100",
                "-V",
                "Debug"
            ]
        );
        assert_eq!(
            spec.capture,
            Some(PathBuf::from("./test-bbt-relocation-listener.output.log"))
        );

        config.artifacts.capture_output = false;
        assert!(test_binary(&config, "non-timebase", 8099).capture.is_none());
    }
}
