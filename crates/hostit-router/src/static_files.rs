//! Static artifact serving.
//!
//! A published artifact is a directory `<artifact_root>/<pointer>/`.

use std::path::Path;

use axum::body::Body;
use axum::extract::Request;
use axum::response::Response;
use tower::ServiceExt;
use tower_http::services::ServeDir;

use crate::error::RouterError;

/// Artifact pointers are single path segments.
pub fn is_valid_pointer(pointer: &str) -> bool {
    !pointer.is_empty()
        && !pointer.starts_with('.')
        && pointer
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

/// Serve the requested path from an artifact directory. `/` serves
/// `index.html`; missing files are 404.
pub async fn serve_artifact(
    root: &Path,
    pointer: &str,
    request: Request,
) -> Result<Response, RouterError> {
    if !is_valid_pointer(pointer) {
        return Err(RouterError::InvalidPointer(pointer.to_string()));
    }

    let service = ServeDir::new(root.join(pointer));
    match service.oneshot(request).await {
        Ok(response) => Ok(response.map(Body::new)),
        Err(never) => match never {},
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pointer_validation() {
        assert!(is_valid_pointer("a1b2c3d4"));
        assert!(is_valid_pointer("0192f1c47a2b7c3d8e4fa1b2c3d4e5f6"));
        assert!(!is_valid_pointer(""));
        assert!(!is_valid_pointer(".."));
        assert!(!is_valid_pointer("../etc"));
        assert!(!is_valid_pointer("a/b"));
    }
}
