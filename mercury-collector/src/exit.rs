//! Exit codes for the mercury CLI.

use crate::commands::CommandError;

/// Exit code constants.
pub mod codes {
    /// Successful execution.
    pub const SUCCESS: i32 = 0;
    /// A required subsystem failed to start, or the only worker failed.
    pub const FAILURE: i32 = 1;
    /// Invalid arguments or configuration file.
    pub const USAGE: i32 = 255;
}

/// Map a CommandError to an exit code.
pub fn exit_code(error: &CommandError) -> i32 {
    match error {
        CommandError::InvalidArgument(_) | CommandError::Config(_) => codes::USAGE,
        CommandError::Analysis(_)
        | CommandError::Output(_)
        | CommandError::Capture(_)
        | CommandError::Replay(_)
        | CommandError::Filesystem(_)
        | CommandError::Privilege(_)
        | CommandError::Pipeline(_)
        | CommandError::NoReplayFiles(_) => codes::FAILURE,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::CliError;
    use crate::config::ConfigError;
    use crate::pipeline::PipelineError;
    use mercury_fs::FsError;
    use mercury_packet::{AnalysisError, CaptureError};
    use std::path::PathBuf;

    #[test]
    fn test_exit_code_invalid_argument() {
        let error = CommandError::InvalidArgument(CliError::NoInput);
        assert_eq!(exit_code(&error), codes::USAGE);
    }

    #[test]
    fn test_exit_code_config_file() {
        let error = CommandError::Config(ConfigError::Read {
            path: PathBuf::from("m.toml"),
            source: FsError::Path("m.toml".to_string()),
        });
        assert_eq!(exit_code(&error), codes::USAGE);
    }

    #[test]
    fn test_exit_code_analysis_init() {
        let error = CommandError::Analysis(AnalysisError::Read {
            path: PathBuf::from("r.json"),
            source: FsError::Path("r.json".to_string()),
        });
        assert_eq!(exit_code(&error), codes::FAILURE);
    }

    #[test]
    fn test_exit_code_capture_and_pipeline() {
        let capture = CommandError::Capture(CaptureError::InterfaceNotFound {
            interface: "eth9".to_string(),
        });
        assert_eq!(exit_code(&capture), codes::FAILURE);
        let pipeline = CommandError::Pipeline(PipelineError::CoordinatorPanicked);
        assert_eq!(exit_code(&pipeline), codes::FAILURE);
    }

    #[test]
    fn test_exit_codes_constants() {
        assert_eq!(codes::SUCCESS, 0);
        assert_eq!(codes::FAILURE, 1);
        assert_eq!(codes::USAGE, 255);
    }
}
