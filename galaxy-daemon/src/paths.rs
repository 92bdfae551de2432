use std::path::{Path, PathBuf};

pub use galaxy_core::registry::galaxy_root;
pub use galaxy_sync::store::repositories_dir_at as repositories_root;

pub const WORKER_SOCKET: &str = "worker.sock";

pub fn run_dir(home: &Path) -> PathBuf {
    galaxy_root(home).join("run")
}

pub fn socket_path(home: &Path) -> PathBuf {
    run_dir(home).join(WORKER_SOCKET)
}
