use anyhow::{bail, Result};
use std::{
    env, fs,
    os::unix::net::UnixStream,
    path::{Path, PathBuf},
    process::Command,
    sync::OnceLock,
    thread,
    time::{Duration, Instant},
};

const SOCKET_WAIT_TIMEOUT: Duration = Duration::from_secs(5);
const DOCKER_SOCKET: &str = "/var/run/docker.sock";

/// Ensure a container runtime socket is reachable for testcontainers.
///
/// testcontainers talks to the Docker API. A Podman socket works too, but it
/// has to be exported through `DOCKER_HOST` before the tests start.
///
/// # Errors
/// Returns an error if no reachable Docker API socket can be found.
pub fn ensure_container_runtime() -> Result<()> {
    static INIT: OnceLock<Result<(), String>> = OnceLock::new();
    match INIT.get_or_init(detect_container_runtime) {
        Ok(()) => Ok(()),
        Err(message) => bail!("{message}"),
    }
}

fn detect_container_runtime() -> Result<(), String> {
    if let Ok(docker_host) = env::var("DOCKER_HOST") {
        return validate_docker_host(&docker_host);
    }

    let docker_socket = Path::new(DOCKER_SOCKET);
    if wait_for_socket(docker_socket, SOCKET_WAIT_TIMEOUT) {
        return Ok(());
    }

    if docker_socket.exists() {
        let mut message = format!(
            "Docker socket found at `{}`, but it is not accepting connections.",
            docker_socket.display()
        );
        if let Some(err) = docker_info_error() {
            message.push_str(&format!(" docker info error: {err}"));
        }
        message.push_str(" Start the Docker daemon or set `DOCKER_HOST`.");
        return Err(message);
    }

    if let Some(path) = find_podman_socket() {
        return Err(format!(
            "Podman socket found at `{}`; export DOCKER_HOST=unix://{} to run container tests.",
            path.display(),
            path.display()
        ));
    }

    let mut message =
        "No container runtime socket found. Start the Docker daemon or set `DOCKER_HOST`."
            .to_string();
    if env::var("GITHUB_ACTIONS").is_ok() {
        message.push_str(
            " GitHub Actions: container jobs must mount `/var/run/docker.sock`.",
        );
    }
    Err(message)
}

fn validate_docker_host(docker_host: &str) -> Result<(), String> {
    let socket = docker_host
        .strip_prefix("unix://")
        .or_else(|| docker_host.starts_with('/').then_some(docker_host));

    // tcp:// and friends are left to testcontainers.
    let Some(socket) = socket else {
        return Ok(());
    };

    if wait_for_socket(Path::new(socket), SOCKET_WAIT_TIMEOUT) {
        Ok(())
    } else {
        Err(format!(
            "`DOCKER_HOST` points to `{docker_host}`, but the socket is not accepting connections."
        ))
    }
}

fn find_podman_socket() -> Option<PathBuf> {
    let mut candidates = Vec::new();
    if let Ok(runtime_dir) = env::var("XDG_RUNTIME_DIR") {
        candidates.push(PathBuf::from(runtime_dir).join("podman/podman.sock"));
    }
    if let Some(uid) = read_uid() {
        candidates.push(PathBuf::from(format!("/run/user/{uid}/podman/podman.sock")));
    }
    candidates.push(PathBuf::from("/run/podman/podman.sock"));

    candidates.into_iter().find(|path| path.exists())
}

fn wait_for_socket(path: &Path, timeout: Duration) -> bool {
    if !path.exists() {
        return false;
    }

    let start = Instant::now();
    while start.elapsed() < timeout {
        if UnixStream::connect(path).is_ok() {
            return true;
        }
        thread::sleep(Duration::from_millis(200));
    }
    false
}

fn docker_info_error() -> Option<String> {
    let output = match Command::new("docker").arg("info").output() {
        Ok(output) => output,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return None,
        Err(err) => return Some(err.to_string()),
    };

    if output.status.success() {
        return None;
    }

    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    if stderr.is_empty() {
        Some(format!("docker info exited with {}", output.status))
    } else {
        Some(stderr)
    }
}

fn read_uid() -> Option<u32> {
    let status = fs::read_to_string("/proc/self/status").ok()?;
    let rest = status.lines().find_map(|line| line.strip_prefix("Uid:"))?;
    rest.split_whitespace().next()?.parse::<u32>().ok()
}
