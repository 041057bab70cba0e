//! Preflight checks for the external packaging toolchain.
//!
//! The archive itself needs nothing from the host. Compiling asset catalogs
//! needs Xcode's `xcrun`, which resolves `actool`.
//!
//! # Example
//!
//! ```rust
//! use refpack::preflight::{check_required_tools, command_exists};
//!
//! if !command_exists("xcrun") {
//!     println!("Xcode command line tools not installed");
//! }
//!
//! let tools = &[("xcrun", "Xcode command line tools (xcode-select --install)")];
//! if let Err(e) = check_required_tools(tools) {
//!     eprintln!("{}", e);
//! }
//! ```

use anyhow::{bail, Result};

use crate::process;

/// Tools needed to compile asset catalogs.
///
/// Each tuple is (command_name, install_hint).
pub const REQUIRED_TOOLS: &[(&str, &str)] = &[(
    "xcrun",
    "Xcode command line tools (xcode-select --install)",
)];

/// Check if a command exists in PATH.
pub fn command_exists(cmd: &str) -> bool {
    process::exists(cmd)
}

/// Check that specific tools are available.
///
/// Returns an error listing every missing tool with its install hint.
pub fn check_required_tools(tools: &[(&str, &str)]) -> Result<()> {
    let missing: Vec<_> = tools
        .iter()
        .filter(|(tool, _)| !command_exists(tool))
        .collect();

    if !missing.is_empty() {
        let msg = missing
            .iter()
            .map(|(t, hint)| format!("  {} (install: {})", t, hint))
            .collect::<Vec<_>>()
            .join("\n");
        bail!("Missing required host tools:\n{}", msg);
    }

    Ok(())
}

/// Check the tools in [`REQUIRED_TOOLS`].
pub fn check_host_tools() -> Result<()> {
    check_required_tools(REQUIRED_TOOLS)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn test_command_exists() {
        assert!(command_exists("sh"));
        assert!(!command_exists("definitely_not_a_real_command_12345"));
    }

    #[test]
    fn test_check_required_tools_success() {
        let tools = &[("sh", "coreutils"), ("cat", "coreutils")];
        assert!(check_required_tools(tools).is_ok());
    }

    #[test]
    fn test_check_required_tools_failure() {
        let tools = &[
            ("sh", "coreutils"),
            ("nonexistent_command_xyz", "fake-package"),
        ];
        let err = check_required_tools(tools).unwrap_err().to_string();
        assert!(err.contains("nonexistent_command_xyz (install: fake-package)"));
        assert!(!err.contains("  sh"));
    }
}
