use std::path::PathBuf;

const APP_DIR: &str = "tastefeed";

/// Environment variable holding an already-issued bearer token.
pub const TOKEN_ENV: &str = "TASTEFEED_TOKEN";

fn home() -> PathBuf {
    dirs::home_dir().unwrap_or_else(std::env::temp_dir)
}

/// Log file and token live here: `~/.local/share/tastefeed` on every unix,
/// macOS included.
pub fn data_dir() -> PathBuf {
    #[cfg(unix)]
    let base = home().join(".local").join("share");
    #[cfg(windows)]
    let base = dirs::data_local_dir().unwrap_or_else(home);
    base.join(APP_DIR)
}

/// `~/.config/tastefeed` on unix, roaming app data on Windows.
pub fn config_dir() -> PathBuf {
    #[cfg(unix)]
    let base = home().join(".config");
    #[cfg(windows)]
    let base = dirs::config_dir().unwrap_or_else(home);
    base.join(APP_DIR)
}

/// Program and leading arguments used to hand a URL to the desktop's
/// default browser.  The URL is appended as the final argument.
#[cfg(target_os = "macos")]
pub fn browser_command() -> (&'static str, &'static [&'static str]) {
    ("open", &[])
}

#[cfg(all(unix, not(target_os = "macos")))]
pub fn browser_command() -> (&'static str, &'static [&'static str]) {
    ("xdg-open", &[])
}

#[cfg(windows)]
pub fn browser_command() -> (&'static str, &'static [&'static str]) {
    // `start` is a cmd builtin; the empty string is the window title.
    ("cmd", &["/C", "start", ""])
}

/// Read the bearer token from `TASTEFEED_TOKEN`, falling back to the first
/// non-empty line of `token_file`.
pub fn read_token(token_file: &std::path::Path) -> Option<String> {
    if let Ok(token) = std::env::var(TOKEN_ENV) {
        let token = token.trim().to_string();
        if !token.is_empty() {
            return Some(token);
        }
    }

    let content = std::fs::read_to_string(token_file).ok()?;
    content
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .map(str::to_string)
}
