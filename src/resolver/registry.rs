//! Registry login and image pulls.
//!
//! Private registries are logged into before the pull. Login failures
//! are never retried; pull failures are split into caller-fixable
//! (missing repository, bad reference) and transient engine errors, and
//! only the latter go through the retry policy.

use tracing::{debug, info, warn};

use crate::component::{ComponentDefinition, RegistryKind};
use crate::engine;
use crate::error::ResolveError;
use crate::retry::RetryPolicy;

/// Pulls the component's image, logging in first when the registry
/// requires it. Returns the image digest reported by the engine, when
/// one is available.
pub async fn pull(
    component: &ComponentDefinition,
    retry: &RetryPolicy,
) -> Result<Option<String>, ResolveError> {
    let reference = component.image_reference();

    if component.registry.is_private() {
        login(component).await?;
    }

    retry
        .run(
            |attempt| {
                let reference = reference.clone();
                async move {
                    debug!(image = %reference, attempt, "Pulling image");
                    try_pull(&reference).await
                }
            },
            is_transient,
        )
        .await?;

    info!(image = %reference, "Image pulled");
    Ok(read_digest(&reference).await)
}

/// Single pull attempt with stderr-based error classification.
async fn try_pull(reference: &str) -> Result<(), ResolveError> {
    let output = engine::run_engine(&["pull", reference], None).await?;
    if output.status.success() {
        return Ok(());
    }
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    Err(classify_pull_failure(reference, &stderr))
}

fn classify_pull_failure(reference: &str, stderr: &str) -> ResolveError {
    let lowered = stderr.to_lowercase();
    if lowered.contains("unauthorized") || lowered.contains("authentication required") {
        return ResolveError::LoginFailed {
            registry: reference.to_string(),
            reason: stderr.to_string(),
        };
    }
    if lowered.contains("not found")
        || lowered.contains("does not exist")
        || lowered.contains("manifest unknown")
        || lowered.contains("invalid reference")
    {
        return ResolveError::PullFailed {
            image: reference.to_string(),
            reason: stderr.to_string(),
        };
    }
    ResolveError::Engine(stderr.to_string())
}

/// Only unexpected engine failures are worth retrying; auth and missing
/// repositories will not fix themselves.
fn is_transient(err: &ResolveError) -> bool {
    matches!(err, ResolveError::Engine(_) | ResolveError::Io(_))
}

/// Authenticates against the component's registry.
async fn login(component: &ComponentDefinition) -> Result<(), ResolveError> {
    match component.registry {
        RegistryKind::AwsEcr => login_ecr(component).await,
        _ => login_with_credentials(component).await,
    }
}

async fn login_with_credentials(component: &ComponentDefinition) -> Result<(), ResolveError> {
    let registry_name = component
        .registry
        .server()
        .unwrap_or("docker.io")
        .to_string();
    let credentials =
        component
            .repository
            .as_ref()
            .ok_or_else(|| ResolveError::LoginFailed {
                registry: registry_name.clone(),
                reason: "no credentials supplied for a private registry".to_string(),
            })?;
    let username = credentials
        .username
        .as_deref()
        .ok_or_else(|| ResolveError::LoginFailed {
            registry: registry_name.clone(),
            reason: "credentials are missing a username".to_string(),
        })?;
    let password = credentials
        .password
        .as_deref()
        .ok_or_else(|| ResolveError::LoginFailed {
            registry: registry_name.clone(),
            reason: "credentials are missing a password".to_string(),
        })?;

    let mut args = vec!["login", "--username", username, "--password-stdin"];
    if let Some(server) = component.registry.server() {
        args.push(server);
    }

    debug!(registry = %registry_name, username, "Logging into registry");
    let output = engine::run_engine(&args, Some(password)).await?;
    if !output.status.success() {
        return Err(ResolveError::LoginFailed {
            registry: registry_name,
            reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(())
}

/// ECR logins exchange an instance-role token for a registry password;
/// the account and region come from the image URI itself.
async fn login_ecr(component: &ComponentDefinition) -> Result<(), ResolveError> {
    let (server, region) =
        parse_ecr_uri(&component.uri).ok_or_else(|| ResolveError::LoginFailed {
            registry: component.uri.clone(),
            reason: "URI is not a valid ECR repository".to_string(),
        })?;

    let token = tokio::process::Command::new("aws")
        .args(["ecr", "get-login-password", "--region", &region])
        .output()
        .await?;
    if !token.status.success() {
        return Err(ResolveError::LoginFailed {
            registry: server,
            reason: String::from_utf8_lossy(&token.stderr).trim().to_string(),
        });
    }
    let password = String::from_utf8_lossy(&token.stdout).trim().to_string();

    debug!(registry = %server, "Logging into ECR");
    let output = engine::run_engine(
        &["login", "--username", "AWS", "--password-stdin", &server],
        Some(&password),
    )
    .await?;
    if !output.status.success() {
        return Err(ResolveError::LoginFailed {
            registry: server,
            reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(())
}

/// Splits `<account>.dkr.ecr.<region>.amazonaws.com/...` into the login
/// server and the region.
fn parse_ecr_uri(uri: &str) -> Option<(String, String)> {
    let server = uri.split('/').next()?;
    let mut parts = server.split('.');
    let account = parts.next()?;
    if account.is_empty() || !account.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    if parts.next()? != "dkr" || parts.next()? != "ecr" {
        return None;
    }
    let region = parts.next()?;
    if region.is_empty() || parts.next()? != "amazonaws" || parts.next()? != "com" {
        return None;
    }
    Some((server.to_string(), region.to_string()))
}

/// Reads the repo digest of a pulled image. Best effort, a missing
/// digest only loses provenance in the report.
async fn read_digest(reference: &str) -> Option<String> {
    let output = engine::run_engine(
        &[
            "inspect",
            "--format",
            "{{index .RepoDigests 0}}",
            reference,
        ],
        None,
    )
    .await
    .ok()?;
    if !output.status.success() {
        warn!(image = %reference, "Could not read image digest");
        return None;
    }
    let digest = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if digest.is_empty() || digest == "<no value>" {
        None
    } else {
        Some(digest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ecr_uri() {
        assert_eq!(
            parse_ecr_uri("123456789012.dkr.ecr.eu-west-1.amazonaws.com/acme/runner"),
            Some((
                "123456789012.dkr.ecr.eu-west-1.amazonaws.com".to_string(),
                "eu-west-1".to_string()
            ))
        );
    }

    #[test]
    fn test_parse_ecr_uri_rejects_other_registries() {
        assert_eq!(parse_ecr_uri("quay.io/acme/runner"), None);
        assert_eq!(parse_ecr_uri("acme/runner"), None);
        assert_eq!(parse_ecr_uri("abc.dkr.ecr.eu-west-1.amazonaws.com/x"), None);
        assert_eq!(parse_ecr_uri(""), None);
    }

    #[test]
    fn test_auth_failures_classified_as_login() {
        let err = classify_pull_failure("acme/x:1", "unauthorized: access denied");
        assert!(matches!(err, ResolveError::LoginFailed { .. }));
        assert!(!is_transient(&err));
    }

    #[test]
    fn test_missing_repository_is_pull_failure() {
        for stderr in [
            "pull access denied, repository does not exist",
            "manifest unknown: manifest unknown",
            "Error response from daemon: repository acme/x not found",
        ] {
            let err = classify_pull_failure("acme/x:1", stderr);
            assert!(matches!(err, ResolveError::PullFailed { .. }), "{stderr}");
            assert!(!is_transient(&err));
        }
    }

    #[test]
    fn test_other_engine_failures_are_transient() {
        let err = classify_pull_failure("acme/x:1", "i/o timeout talking to registry");
        assert!(matches!(err, ResolveError::Engine(_)));
        assert!(is_transient(&err));
    }
}
