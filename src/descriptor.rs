//! Server descriptors
//!
//! Immutable inputs to an acquisition. A descriptor declares how a single
//! MCP server is reached: a local executable spoken to over pipes, or a
//! remote HTTP endpoint. The local/remote split is an enum, so a local
//! descriptor structurally cannot carry a base URL and vice versa.
//!
//! This module also owns the environment build for local servers: project
//! variables, overridden by server variables, overridden by a resolved
//! `PATH`. GUI-launched processes often start with a minimal environment, so
//! when no `PATH` is available we fall back to asking the user's login shell
//! for one.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{ClassifiedError, ErrorKind, Phase};

/// How a remote server's HTTP transport should be selected.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum TransportMode {
    /// Probe plain HTTP first, fall back to the streaming transport
    #[default]
    Auto,

    /// Plain HTTP request/response only
    HttpOnly,

    /// Streamable HTTP (server-sent event responses)
    HttpWithSse,
}

/// Where a header's value comes from at acquisition time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum HeaderValueSource {
    /// A fixed value stored in the configuration
    Literal(String),

    /// A bearer token obtained from the authorization collaborator per
    /// attempt, never cached in the descriptor
    OauthBearer,
}

/// One configured HTTP header for a remote server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HeaderSpec {
    /// Header name
    pub name: String,

    /// Header value source
    pub value: HeaderValueSource,
}

/// A local MCP server spawned as a subprocess.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LocalDescriptor {
    /// Server identity used for cache, health and log records
    pub name: String,

    /// Executable path or bare command name (resolved against `PATH`)
    pub executable: String,

    /// Command arguments, in order
    #[serde(default)]
    pub arguments: Vec<String>,

    /// Working directory for the spawned process
    #[serde(default)]
    pub working_directory: Option<PathBuf>,

    /// Project-level environment variables
    #[serde(default)]
    pub project_env: HashMap<String, String>,

    /// Server-level environment variables (win on key collision)
    #[serde(default)]
    pub server_env: HashMap<String, String>,
}

/// A remote MCP server reached over HTTP.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RemoteDescriptor {
    /// Server identity used for cache, health and log records
    pub name: String,

    /// Endpoint base URL
    pub base_url: String,

    /// Headers sent with every request, in order
    #[serde(default)]
    pub headers: Vec<HeaderSpec>,

    /// Transport selection strategy
    #[serde(default)]
    pub transport_mode: TransportMode,
}

/// Immutable input to one acquisition.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ServerDescriptor {
    /// Local subprocess server
    LocalProcess(LocalDescriptor),

    /// Remote HTTP/SSE server
    RemoteHttp(RemoteDescriptor),
}

impl ServerDescriptor {
    /// The configured server identity.
    pub fn identity(&self) -> &str {
        match self {
            Self::LocalProcess(d) => &d.name,
            Self::RemoteHttp(d) => &d.name,
        }
    }

    /// Validate required fields for the declared kind. Runs before any I/O.
    pub fn validate(&self) -> Result<(), ClassifiedError> {
        match self {
            Self::LocalProcess(d) => d.validate(),
            Self::RemoteHttp(d) => d.validate(),
        }
    }
}

impl LocalDescriptor {
    /// Validate the descriptor.
    pub fn validate(&self) -> Result<(), ClassifiedError> {
        if self.name.trim().is_empty() {
            return Err(ClassifiedError::invalid_configuration(
                "local server has no identity",
            ));
        }
        if self.executable.trim().is_empty() {
            return Err(ClassifiedError::invalid_configuration(format!(
                "local server '{}' has no executable path",
                self.name
            )));
        }
        Ok(())
    }

    /// Build the execution environment: project variables, overridden by
    /// server variables, overridden by a resolved `PATH`.
    pub async fn build_environment(&self) -> HashMap<String, String> {
        let mut env: HashMap<String, String> = self.project_env.clone();
        env.extend(self.server_env.iter().map(|(k, v)| (k.clone(), v.clone())));

        let path = resolve_search_path(env.get("PATH")).await;
        env.insert("PATH".to_string(), path);
        env
    }
}

impl RemoteDescriptor {
    /// Validate the descriptor.
    pub fn validate(&self) -> Result<(), ClassifiedError> {
        if self.name.trim().is_empty() {
            return Err(ClassifiedError::invalid_configuration(
                "remote server has no identity",
            ));
        }
        if self.base_url.trim().is_empty() {
            return Err(ClassifiedError::invalid_configuration(format!(
                "remote server '{}' has no base URL",
                self.name
            )));
        }
        if reqwest::Url::parse(&self.base_url).is_err() {
            return Err(ClassifiedError::invalid_configuration(format!(
                "remote server '{}' has an unparseable base URL: {}",
                self.name, self.base_url
            )));
        }
        Ok(())
    }

    /// Whether any header draws its value from the authorization
    /// collaborator.
    pub fn requires_bearer_token(&self) -> bool {
        self.headers
            .iter()
            .any(|h| h.value == HeaderValueSource::OauthBearer)
    }
}

/// Resolve the `PATH` to search for executables.
///
/// Preference order: the merged descriptor environment, the process
/// environment, then the user's login shell.
async fn resolve_search_path(configured: Option<&String>) -> String {
    if let Some(path) = configured {
        if !path.trim().is_empty() {
            return path.clone();
        }
    }

    if let Ok(path) = std::env::var("PATH") {
        if !path.trim().is_empty() {
            return path;
        }
    }

    login_shell_path().await.unwrap_or_default()
}

/// Ask the user's login shell for its `PATH`.
async fn login_shell_path() -> Option<String> {
    let shell = std::env::var("SHELL").unwrap_or_else(|_| "/bin/sh".to_string());

    tracing::debug!("No usable PATH; querying login shell {}", shell);

    let output = tokio::process::Command::new(&shell)
        .args(["-lc", "echo $PATH"])
        .output()
        .await
        .ok()?;

    if !output.status.success() {
        tracing::debug!("Login shell exited with {}", output.status);
        return None;
    }

    let path = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if path.is_empty() {
        None
    } else {
        Some(path)
    }
}

/// Resolve a configured executable to a spawnable path.
///
/// A value containing a path separator is used verbatim; a bare name is
/// searched for on the given `PATH`.
pub fn resolve_executable(
    server: &str,
    executable: &str,
    search_path: &str,
    working_directory: Option<&Path>,
) -> Result<PathBuf, ClassifiedError> {
    if executable.contains(std::path::MAIN_SEPARATOR) {
        return Ok(PathBuf::from(executable));
    }

    let cwd = working_directory
        .map(Path::to_path_buf)
        .or_else(|| std::env::current_dir().ok())
        .unwrap_or_else(|| PathBuf::from("."));

    which::which_in(executable, Some(search_path), cwd).map_err(|_| {
        ClassifiedError::new(
            Phase::Connect,
            ErrorKind::ExecutionFailed,
            format!(
                "executable '{}' for server '{}' not found on PATH",
                executable, server
            ),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn local(name: &str, executable: &str) -> LocalDescriptor {
        LocalDescriptor {
            name: name.to_string(),
            executable: executable.to_string(),
            arguments: vec![],
            working_directory: None,
            project_env: HashMap::new(),
            server_env: HashMap::new(),
        }
    }

    fn remote(name: &str, url: &str) -> RemoteDescriptor {
        RemoteDescriptor {
            name: name.to_string(),
            base_url: url.to_string(),
            headers: vec![],
            transport_mode: TransportMode::Auto,
        }
    }

    #[test]
    fn test_local_validation_rejects_empty_executable() {
        let d = local("files", "");
        let err = d.validate().unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidConfiguration);
    }

    #[test]
    fn test_local_validation_rejects_empty_name() {
        let d = local("  ", "/bin/true");
        assert!(d.validate().is_err());
    }

    #[test]
    fn test_remote_validation_rejects_bad_url() {
        assert!(remote("r", "not a url").validate().is_err());
        assert!(remote("r", "").validate().is_err());
        assert!(remote("r", "https://mcp.example.com/rpc").validate().is_ok());
    }

    #[test]
    fn test_descriptor_identity() {
        let d = ServerDescriptor::LocalProcess(local("files", "/bin/cat"));
        assert_eq!(d.identity(), "files");

        let d = ServerDescriptor::RemoteHttp(remote("api", "https://example.com"));
        assert_eq!(d.identity(), "api");
    }

    #[tokio::test]
    async fn test_environment_server_wins_over_project() {
        let mut d = local("files", "/bin/true");
        d.project_env.insert("A".to_string(), "project".to_string());
        d.project_env.insert("B".to_string(), "project".to_string());
        d.server_env.insert("A".to_string(), "server".to_string());

        let env = d.build_environment().await;
        assert_eq!(env.get("A").map(String::as_str), Some("server"));
        assert_eq!(env.get("B").map(String::as_str), Some("project"));
    }

    #[tokio::test]
    async fn test_environment_configured_path_wins() {
        let mut d = local("files", "/bin/true");
        d.server_env
            .insert("PATH".to_string(), "/custom/bin".to_string());

        let env = d.build_environment().await;
        assert_eq!(env.get("PATH").map(String::as_str), Some("/custom/bin"));
    }

    #[tokio::test]
    async fn test_environment_falls_back_to_process_path() {
        // The test process has a PATH, so an unconfigured descriptor should
        // pick it up rather than shelling out.
        let d = local("files", "/bin/true");
        let env = d.build_environment().await;
        assert_eq!(env.get("PATH"), std::env::var("PATH").ok().as_ref());
    }

    #[test]
    fn test_resolve_executable_verbatim_with_separator() {
        let path = resolve_executable("s", "/no/such/binary", "", None).unwrap();
        assert_eq!(path, PathBuf::from("/no/such/binary"));
    }

    #[cfg(unix)]
    #[test]
    fn test_resolve_executable_searches_path() {
        let path = resolve_executable("s", "sh", "/usr/bin:/bin", None).unwrap();
        assert!(path.ends_with("sh"));
    }

    #[test]
    fn test_resolve_executable_not_found() {
        let err =
            resolve_executable("s", "definitely-not-a-real-binary-xyz", "/nonexistent", None)
                .unwrap_err();
        assert_eq!(err.kind, ErrorKind::ExecutionFailed);
        assert_eq!(err.phase, Phase::Connect);
    }

    #[test]
    fn test_requires_bearer_token() {
        let mut d = remote("api", "https://example.com");
        assert!(!d.requires_bearer_token());

        d.headers.push(HeaderSpec {
            name: "X-Custom".to_string(),
            value: HeaderValueSource::Literal("v".to_string()),
        });
        assert!(!d.requires_bearer_token());

        d.headers.push(HeaderSpec {
            name: "Authorization".to_string(),
            value: HeaderValueSource::OauthBearer,
        });
        assert!(d.requires_bearer_token());
    }

    #[test]
    fn test_descriptor_serde_tagging() {
        let d = ServerDescriptor::LocalProcess(local("files", "/bin/true"));
        let json = serde_json::to_string(&d).unwrap();
        assert!(json.contains("\"kind\":\"localProcess\""));

        let d = ServerDescriptor::RemoteHttp(remote("api", "https://example.com"));
        let json = serde_json::to_string(&d).unwrap();
        assert!(json.contains("\"kind\":\"remoteHttp\""));
    }
}
