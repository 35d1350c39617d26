// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Platform-aware config file resolution.

use std::path::PathBuf;

/// Environment variable naming an explicit config file.
pub const CONFIG_ENV: &str = "KUITTI_CONFIG";

const FILE_NAME: &str = "kuitti.json";

/// Where the daemon reads its config from.
///
/// `KUITTI_CONFIG` wins, then the XDG config dir, then `~/.config`. A file
/// that does not exist there just means defaults.
pub fn config_path() -> PathBuf {
    resolve(
        std::env::var_os(CONFIG_ENV).map(PathBuf::from),
        std::env::var_os("XDG_CONFIG_HOME").map(PathBuf::from),
        std::env::var_os("HOME").map(PathBuf::from),
    )
}

fn resolve(explicit: Option<PathBuf>, xdg: Option<PathBuf>, home: Option<PathBuf>) -> PathBuf {
    if let Some(path) = explicit.filter(|p| !p.as_os_str().is_empty()) {
        return path;
    }
    let base = match (xdg.filter(|p| p.is_absolute()), home) {
        (Some(xdg), _) => xdg,
        (None, Some(home)) => home.join(".config"),
        // Last resort
        (None, None) => return PathBuf::from(FILE_NAME),
    };
    base.join("kuitti").join(FILE_NAME)
}
