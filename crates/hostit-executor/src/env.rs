//! Environment handed to build jobs.
//!
//! User variables come first, followed by the system variables every job
//! needs. System keys always win: a user variable with a reserved name is
//! dropped.

use hostit_core::executor::BuildRequest;
use hostit_core::site::{BuildVariant, EnvVar};

pub const DEPLOYMENT_ID: &str = "HOSTIT_DEPLOYMENT_ID";
pub const CALLBACK_URL: &str = "HOSTIT_CALLBACK_URL";
pub const REPO_URL: &str = "HOSTIT_REPO_URL";
pub const REPO_SHA: &str = "HOSTIT_REPO_SHA";
pub const REPO_BRANCH: &str = "HOSTIT_REPO_BRANCH";
pub const ARTIFACT_KEY: &str = "HOSTIT_ARTIFACT_KEY";
pub const BUILD_TYPE: &str = "HOSTIT_BUILD_TYPE";
pub const IMAGE: &str = "HOSTIT_IMAGE";
pub const REGISTRY_TOKEN: &str = "HOSTIT_REGISTRY_TOKEN";

const RESERVED: &[&str] = &[
    DEPLOYMENT_ID,
    CALLBACK_URL,
    REPO_URL,
    REPO_SHA,
    REPO_BRANCH,
    ARTIFACT_KEY,
    BUILD_TYPE,
    IMAGE,
    REGISTRY_TOKEN,
];

pub fn is_reserved(key: &str) -> bool {
    RESERVED.contains(&key)
}

/// Flatten a build request into the job's environment.
pub fn job_env(request: &BuildRequest, variant: BuildVariant) -> Vec<EnvVar> {
    let mut env: Vec<EnvVar> = user_env(&request.env);

    env.push(EnvVar::new(DEPLOYMENT_ID, request.deployment_id.to_string()));
    env.push(EnvVar::new(CALLBACK_URL, &request.callback_url));
    env.push(EnvVar::new(REPO_URL, &request.clone_url));
    if let Some(sha) = &request.commit_sha {
        env.push(EnvVar::new(REPO_SHA, sha));
    }
    if let Some(branch) = &request.branch {
        env.push(EnvVar::new(REPO_BRANCH, branch));
    }
    env.push(EnvVar::new(ARTIFACT_KEY, &request.artifact_key));
    env.push(EnvVar::new(BUILD_TYPE, variant.as_str()));
    env
}

/// User variables with blank or reserved keys removed.
pub fn user_env(vars: &[EnvVar]) -> Vec<EnvVar> {
    vars.iter()
        .filter(|v| !v.key.trim().is_empty())
        .filter(|v| {
            let reserved = is_reserved(&v.key);
            if reserved {
                tracing::warn!(key = %v.key, "Dropping user variable with reserved name");
            }
            !reserved
        })
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use hostit_core::ResourceId;

    fn request(env: Vec<EnvVar>) -> BuildRequest {
        BuildRequest {
            deployment_id: ResourceId::new_unguessable(),
            site_id: ResourceId::new(),
            clone_url: "https://github.com/octo/app.git".to_string(),
            commit_sha: Some("abc123".to_string()),
            branch: Some("main".to_string()),
            env,
            callback_url: "https://hostit.example/callback?deployment_id=x".to_string(),
            artifact_key: "abc123".to_string(),
        }
    }

    fn value<'a>(env: &'a [EnvVar], key: &str) -> Option<&'a str> {
        env.iter().find(|v| v.key == key).map(|v| v.value.as_str())
    }

    #[test]
    fn test_user_vars_come_first() {
        let req = request(vec![EnvVar::new("API_URL", "https://api")]);
        let env = job_env(&req, BuildVariant::Static);
        assert_eq!(env[0], EnvVar::new("API_URL", "https://api"));
        assert_eq!(value(&env, REPO_SHA), Some("abc123"));
        assert_eq!(value(&env, BUILD_TYPE), Some("static"));
        assert_eq!(value(&env, CALLBACK_URL), Some(req.callback_url.as_str()));
    }

    #[test]
    fn test_reserved_and_blank_keys_dropped() {
        let req = request(vec![
            EnvVar::new("", "x"),
            EnvVar::new(REPO_URL, "https://evil.example/repo.git"),
            EnvVar::new("KEEP", "1"),
        ]);
        let env = job_env(&req, BuildVariant::Server);
        assert_eq!(env.iter().filter(|v| v.key == REPO_URL).count(), 1);
        assert_eq!(value(&env, REPO_URL), Some("https://github.com/octo/app.git"));
        assert_eq!(value(&env, BUILD_TYPE), Some("server"));
        assert!(env.iter().all(|v| !v.key.is_empty()));
    }

    #[test]
    fn test_missing_commit_omits_sha() {
        let mut req = request(vec![]);
        req.commit_sha = None;
        let env = job_env(&req, BuildVariant::Static);
        assert_eq!(value(&env, REPO_SHA), None);
    }
}
