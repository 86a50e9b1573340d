use std::path::PathBuf;

// Fixed locations used outside dev mode. DevMode supplies the local equivalents.

pub fn system_config_file() -> PathBuf {
    PathBuf::from("/etc/faceward/faceward.toml")
}

pub fn system_models_dir() -> PathBuf {
    PathBuf::from("/usr/share/faceward/models")
}

pub fn system_socket_path() -> PathBuf {
    PathBuf::from("/run/faceward/service.sock")
}
