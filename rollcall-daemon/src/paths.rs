use std::path::{Path, PathBuf};

pub const DAEMON_SOCKET: &str = "daemon.sock";

pub fn rollcall_root(home: &Path) -> PathBuf {
    rollcall_core::config::rollcall_dir_at(home)
}

pub fn socket_path(home: &Path) -> PathBuf {
    rollcall_root(home).join(DAEMON_SOCKET)
}
