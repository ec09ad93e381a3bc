//! External hostname resolution.
//!
//! Published ports are reachable on `localhost` when tests run on the Docker
//! host itself, and on `docker` inside a GitLab CI job using Docker-in-Docker.
//! Resolution is a pure function of an environment lookup so service
//! constructors can be handed the result instead of reading the environment.

/// Environment variable whose presence marks a GitLab CI job.
pub const CI_INDICATOR: &str = "GITLAB_CI";

/// Hostname used inside CI (Docker-in-Docker service alias).
pub const CI_HOST: &str = "docker";

/// Hostname used everywhere else.
pub const LOCAL_HOST: &str = "localhost";

/// Resolve the host published ports are reachable on.
///
/// A non-empty `explicit` value always wins.
pub fn external_host<F>(explicit: Option<&str>, env: F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(host) = explicit.filter(|h| !h.is_empty()) {
        return host.to_string();
    }
    match env(CI_INDICATOR) {
        Some(value) if !value.is_empty() => CI_HOST.to_string(),
        _ => LOCAL_HOST.to_string(),
    }
}

/// [`external_host`] against the current process environment.
pub fn external_host_from_process(explicit: Option<&str>) -> String {
    external_host(explicit, |key| std::env::var(key).ok())
}
