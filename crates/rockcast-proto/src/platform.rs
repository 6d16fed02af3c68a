use std::path::PathBuf;

pub const DAEMON_TCP_PORT: u16 = 9876;

#[cfg(unix)]
pub fn mpv_socket_name() -> String {
    format!("{}/rockcast-mpv.sock", std::env::temp_dir().display())
}

#[cfg(windows)]
pub fn mpv_socket_name() -> String {
    "rockcast-mpv".to_string()
}

#[cfg(unix)]
pub fn mpv_socket_arg() -> String {
    format!("--input-ipc-server={}", mpv_socket_name())
}

#[cfg(windows)]
pub fn mpv_socket_arg() -> String {
    format!("--input-ipc-server=\\\\.\\pipe\\{}", mpv_socket_name())
}

pub fn data_dir() -> PathBuf {
    // ~/.local/share/rockcast on every unix, including macOS
    #[cfg(unix)]
    {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("/tmp"))
            .join(".local")
            .join("share")
            .join("rockcast")
    }
    #[cfg(windows)]
    {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("rockcast")
    }
}

pub fn config_dir() -> PathBuf {
    #[cfg(unix)]
    {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".config")
            .join("rockcast")
    }

    #[cfg(windows)]
    {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("rockcast")
    }
}

#[cfg(unix)]
pub fn mpv_binary_name() -> &'static str {
    "mpv"
}

#[cfg(windows)]
pub fn mpv_binary_name() -> &'static str {
    "mpv.exe"
}

/// Find the mpv binary: beside the current executable first, then PATH.
pub fn find_mpv_binary() -> Option<PathBuf> {
    let exe_name = mpv_binary_name();

    if let Ok(current_exe) = std::env::current_exe() {
        if let Some(dir) = current_exe.parent() {
            let local_mpv = dir.join(exe_name);
            if local_mpv.exists() {
                return Some(local_mpv);
            }
        }
    }

    let path = std::env::var("PATH").ok()?;
    #[cfg(unix)]
    let separator = ":";
    #[cfg(windows)]
    let separator = ";";

    path.split(separator)
        .map(|dir| PathBuf::from(dir).join(exe_name))
        .find(|p| p.exists())
}
