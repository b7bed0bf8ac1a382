//! Generated build script for server-variant sites.
//!
//! The script never contains user values. Everything it needs arrives through
//! the job environment; user variables reach `docker build` as `--build-arg
//! KEY` so their values are read from that environment.

use hostit_core::deployer::ImageRef;
use hostit_core::site::EnvVar;

use crate::env::{CALLBACK_URL, IMAGE, REGISTRY_TOKEN, REPO_SHA, REPO_URL};

const DOCKERFILE: &str = r#"FROM node:20-alpine AS builder
WORKDIR /app
COPY package*.json yarn.lock* pnpm-lock.yaml* ./
RUN if [ -f yarn.lock ]; then yarn install --frozen-lockfile; \
    elif [ -f package-lock.json ]; then npm ci; \
    elif [ -f pnpm-lock.yaml ]; then npm install -g pnpm && pnpm install --frozen-lockfile; \
    else npm install; \
    fi
COPY . .
__BUILD_ARGS__
RUN if grep -q '"build":' package.json; then \
      if [ -f yarn.lock ]; then yarn build; \
      elif [ -f pnpm-lock.yaml ]; then pnpm run build; \
      else npm run build; \
      fi; \
    fi

FROM node:20-alpine
WORKDIR /app
COPY --from=builder /app .
ENV NODE_ENV=production
EXPOSE 3000
CMD ["npm", "start"]
"#;

/// Whether `key` can be used as a Dockerfile `ARG` and a shell variable.
pub fn is_identifier(key: &str) -> bool {
    let mut chars = key.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Quote a value for POSIX sh.
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// Keys of user variables that can be forwarded as build args.
pub fn build_arg_keys(vars: &[EnvVar]) -> Vec<&str> {
    vars.iter()
        .map(|v| v.key.as_str())
        .filter(|key| {
            let ok = is_identifier(key);
            if !ok {
                tracing::warn!(key, "Skipping build arg with invalid name");
            }
            ok
        })
        .collect()
}

pub fn dockerfile(arg_keys: &[&str]) -> String {
    let args: Vec<String> = arg_keys.iter().map(|k| format!("ARG {}", k)).collect();
    DOCKERFILE.replace("__BUILD_ARGS__", &args.join("\n"))
}

/// Render the script run by the server build job.
pub fn build_script(image: &ImageRef, arg_keys: &[&str]) -> String {
    let build_args: String = arg_keys
        .iter()
        .map(|k| format!(" --build-arg {}", k))
        .collect();

    format!(
        r#"#!/bin/sh
set -eu

send_callback() {{
    curl -s --max-time 10 -X POST "${callback}" \
        -H "Content-Type: application/json" \
        -d "{{\"status\":\"$1\",\"exit_code\":$2}}" \
        || echo "warning: callback failed"
}}

on_exit() {{
    code=$?
    if [ "$code" -eq 0 ]; then
        send_callback success 0
    else
        send_callback error "$code"
    fi
}}
trap on_exit EXIT

send_callback started 0

if ! command -v git >/dev/null 2>&1 || ! command -v curl >/dev/null 2>&1; then
    apk add --no-cache git curl >/dev/null
fi

if ! docker info >/dev/null 2>&1; then
    dockerd-entrypoint.sh >/var/log/dockerd.log 2>&1 &
    tries=0
    until docker info >/dev/null 2>&1; do
        tries=$((tries + 1))
        [ "$tries" -lt 60 ] || {{ echo "docker daemon did not start"; exit 1; }}
        sleep 1
    done
fi

mkdir -p /workspace
cd /workspace
git clone "${repo_url}" repo
cd repo
if [ -n "${{{repo_sha}:-}}" ]; then
    git checkout "${repo_sha}"
fi

cat > Dockerfile.hostit <<'HOSTIT_DOCKERFILE'
{dockerfile}HOSTIT_DOCKERFILE

if [ -n "${{{token}:-}}" ]; then
    echo "${token}" | docker login {registry} -u hostit --password-stdin
fi

docker build -f Dockerfile.hostit -t "${image}"{build_args} .
docker push "${image}"
echo "pushed {image_display}"
"#,
        callback = CALLBACK_URL,
        repo_url = REPO_URL,
        repo_sha = REPO_SHA,
        token = REGISTRY_TOKEN,
        image = IMAGE,
        registry = shell_quote(&image.registry),
        dockerfile = dockerfile(arg_keys),
        build_args = build_args,
        image_display = shell_quote(&image.to_string()),
    )
}
