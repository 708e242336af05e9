use anyhow::Result;
use log::info;
use std::path::PathBuf;

/// Validate dataset integrity
pub fn run(path: PathBuf) -> Result<()> {
    use mptiff::validator::validate_dataset;

    info!("mptiff Validator");
    info!("================");
    info!("Dataset: {}", path.display());
    info!("");

    match validate_dataset(&path) {
        Ok(report) => {
            #[cfg(feature = "colorized_output")]
            {
                println!("{}", report.format_colored());
            }

            #[cfg(not(feature = "colorized_output"))]
            {
                println!("{}", report);
            }

            // Exit with error code if validation failed
            if report.has_failures() {
                std::process::exit(1);
            }

            Ok(())
        }
        Err(e) => {
            eprintln!("Validation error: {}", e);
            std::process::exit(1);
        }
    }
}
