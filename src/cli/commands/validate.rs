//! `validate` command.

use serde_json::json;

use crate::cli::args::{OutputFormat, ValidateArgs};
use crate::config::loader::{ConfigLoader, LoaderOptions};
use crate::error::QuestlineError;

/// Validate competition files without starting the server.
///
/// Stops at the first invalid file.
///
/// # Errors
///
/// Returns a config error if a file is missing, unparsable or invalid.
pub fn run(args: &ValidateArgs) -> Result<(), QuestlineError> {
    let loader = ConfigLoader::new(LoaderOptions {
        strict: args.strict,
        ..LoaderOptions::default()
    });

    for path in &args.files {
        tracing::info!(file = %path.display(), "validating configuration");
        let load_result = loader.load(path)?;

        for warning in &load_result.warnings {
            tracing::warn!(
                location = warning.location.as_deref().unwrap_or("<unknown>"),
                "{}",
                warning.message
            );
        }

        match args.format {
            OutputFormat::Human => {
                println!(
                    "{}: valid ({} warning(s))",
                    path.display(),
                    load_result.warnings.len()
                );
            }
            OutputFormat::Json => {
                let warnings: Vec<String> =
                    load_result.warnings.iter().map(ToString::to_string).collect();
                println!(
                    "{}",
                    json!({
                        "file": path.display().to_string(),
                        "valid": true,
                        "warnings": warnings,
                    })
                );
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_valid_and_invalid_files() {
        let good = write(
            "competition: { name: X }\nvariants: { pilot: { tasks: [{ name: A, answer: a }] } }\n",
        );
        let bad = write("competition: { name: X }\nvariants: {}\n");

        let ok = ValidateArgs {
            files: vec![good.path().to_path_buf()],
            format: OutputFormat::Json,
            strict: false,
        };
        assert!(run(&ok).is_ok());

        let failing = ValidateArgs {
            files: vec![good.path().to_path_buf(), bad.path().to_path_buf()],
            format: OutputFormat::Human,
            strict: false,
        };
        let err = run(&failing).unwrap_err();
        assert_eq!(err.exit_code(), crate::error::ExitCode::CONFIG_ERROR);
    }

    #[test]
    fn test_strict_rejects_warnings() {
        let file = write(
            "competition: { name: X }\nvariants: { pilot: { max_skips: 0, tasks: [{ name: A, answer: a }] } }\n",
        );
        let mut args = ValidateArgs {
            files: vec![file.path().to_path_buf()],
            format: OutputFormat::Human,
            strict: false,
        };
        assert!(run(&args).is_ok());
        args.strict = true;
        assert!(run(&args).is_err());
    }
}
