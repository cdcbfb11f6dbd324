//! Version strings shown by `-V` and `--version`.

use std::sync::LazyLock;

use crate::dispatch::pool::resolve_shell;

/// The package version from Cargo.toml.
pub const PKG_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Git revision stamped by the build environment, "" for plain builds.
pub const GIT_REV: &str = match option_env!("LINEFAN_GIT_REV") {
    Some(rev) => rev,
    None => "",
};

/// Short form for `-V`: the bare package version.
pub fn short() -> &'static str {
    PKG_VERSION
}

/// Long form for `--version`: the version, the revision when one was
/// stamped, and the shell worker commands will run under.
pub fn long() -> &'static str {
    static LONG: LazyLock<String> = LazyLock::new(|| {
        let mut out = String::from(PKG_VERSION);
        if !GIT_REV.is_empty() {
            out.push_str(&format!(" (rev {})", GIT_REV));
        }
        out.push_str(&format!("\nworker shell: {}", resolve_shell()));
        out
    });
    LONG.as_str()
}
