//! Dependency install stage.
//!
//! Installs the project from local source plus the pinned development
//! requirements file. A non-zero exit aborts the run immediately; there is
//! no partial-install recovery.

use crate::config::InstallConfig;
use crate::step::StepSpec;

/// Build the install invocation from config.
///
/// `python -m pip install . [-r <requirements>] [extra args...]`
pub fn install_step(config: &InstallConfig) -> StepSpec {
    let mut argv = vec![
        config.python.clone(),
        "-m".to_string(),
        "pip".to_string(),
        "install".to_string(),
        ".".to_string(),
    ];

    if let Some(ref requirements) = config.requirements {
        argv.push("-r".to_string());
        argv.push(requirements.display().to_string());
    }

    argv.extend(config.extra_args.iter().cloned());

    StepSpec::new("install", argv)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_default_install_argv() {
        let step = install_step(&InstallConfig::default());
        assert_eq!(
            step.argv,
            vec![
                "python",
                "-m",
                "pip",
                "install",
                ".",
                "-r",
                "requirements/devel.txt"
            ]
        );
        assert!(step.fatal);
        assert!(!step.always_run);
    }

    #[test]
    fn test_no_requirements() {
        let config = InstallConfig {
            python: "python3".to_string(),
            requirements: None,
            extra_args: Vec::new(),
        };
        let step = install_step(&config);
        assert_eq!(step.argv, vec!["python3", "-m", "pip", "install", "."]);
    }

    #[test]
    fn test_extra_args_appended() {
        let config = InstallConfig {
            python: "python".to_string(),
            requirements: Some(PathBuf::from("reqs.txt")),
            extra_args: vec!["--no-cache-dir".to_string()],
        };
        let step = install_step(&config);
        assert_eq!(step.argv.last().unwrap(), "--no-cache-dir");
    }
}
