use crate::error::{FieldscribeError, Result};
use std::path::Path;
use std::process::Command;

/// Build the Chrome launch command for a managed, exclusively-owned profile.
pub fn build_command(
    chrome_path: &Path,
    user_data_dir: &Path,
    cdp_port: u16,
    headless: bool,
) -> Command {
    let mut cmd = Command::new(chrome_path);

    cmd.arg(format!("--user-data-dir={}", user_data_dir.display()));
    cmd.arg(format!("--remote-debugging-port={}", cdp_port));

    if headless {
        cmd.arg("--headless=new");
        cmd.arg("--disable-gpu");
    }

    cmd.arg("--no-first-run");
    cmd.arg("--no-default-browser-check");
    cmd.arg("--disable-background-networking");
    cmd.arg("--disable-sync");

    // Start on about:blank; the user navigates by hand.
    cmd.arg("about:blank");

    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        // Detach from parent process group so the browser survives on its own
        unsafe {
            cmd.pre_exec(|| {
                libc::setsid();
                Ok(())
            });
        }
    }

    cmd
}

/// Fail fast if the configured browser binary is not usable.
pub fn validate_chrome_path(chrome_path: &Path) -> Result<()> {
    if !chrome_path.exists() {
        return Err(FieldscribeError::Environment(format!(
            "Chrome executable not found at {:?}; set chrome_path in the config",
            chrome_path
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_build_command_basic() {
        let cmd = build_command(
            Path::new("/usr/bin/google-chrome"),
            Path::new("/tmp/fieldscribe-profile"),
            9333,
            false,
        );
        let args: Vec<String> = cmd
            .get_args()
            .map(|s| s.to_string_lossy().to_string())
            .collect();

        assert!(args.contains(&"--user-data-dir=/tmp/fieldscribe-profile".to_string()));
        assert!(args.contains(&"--remote-debugging-port=9333".to_string()));
        assert!(args.contains(&"about:blank".to_string()));
        assert!(!args.contains(&"--headless=new".to_string()));
    }

    #[test]
    fn test_build_command_headless() {
        let cmd = build_command(
            Path::new("/usr/bin/google-chrome"),
            Path::new("/tmp/p"),
            9334,
            true,
        );
        let args: Vec<String> = cmd
            .get_args()
            .map(|s| s.to_string_lossy().to_string())
            .collect();

        assert!(args.contains(&"--headless=new".to_string()));
        assert!(args.contains(&"--disable-gpu".to_string()));
    }

    #[test]
    fn test_validate_chrome_path_missing() {
        let err = validate_chrome_path(&PathBuf::from("/nonexistent/chrome-binary")).unwrap_err();
        assert!(err.to_string().contains("Environment not ready"));
    }
}
