//! Prebuilt UI assets served next to the API.

use std::path::{Path, PathBuf};

use axum::Router;
use thiserror::Error;
use tower_http::services::{ServeDir, ServeFile};

const INDEX_FILE: &str = "index.html";
const BUNDLE_DIR: &str = "_next";

#[derive(Debug, Error)]
pub enum FrontendError {
    #[error("frontend directory {0} does not exist")]
    MissingRoot(PathBuf),

    #[error("frontend bundle directory {0} does not exist; build the UI first")]
    MissingBundle(PathBuf),

    #[error("frontend entry page {0} does not exist")]
    MissingIndex(PathBuf),
}

/// A UI build directory checked to contain `index.html` and `_next/`.
#[derive(Debug, Clone)]
pub struct Frontend {
    root: PathBuf,
}

impl Frontend {
    pub fn locate(root: impl AsRef<Path>) -> Result<Self, FrontendError> {
        let root = root.as_ref().to_path_buf();
        if !root.is_dir() {
            return Err(FrontendError::MissingRoot(root));
        }
        let bundle = root.join(BUNDLE_DIR);
        if !bundle.is_dir() {
            return Err(FrontendError::MissingBundle(bundle));
        }
        let index = root.join(INDEX_FILE);
        if !index.is_file() {
            return Err(FrontendError::MissingIndex(index));
        }
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `/` serves the entry page, `/_next` the bundle directory and
    /// `/static` the whole build, exported pages included.
    pub fn mount(&self, router: Router) -> Router {
        router
            .route_service("/", ServeFile::new(self.root.join(INDEX_FILE)))
            .nest_service("/_next", ServeDir::new(self.root.join(BUNDLE_DIR)))
            .nest_service("/static", ServeDir::new(&self.root))
    }
}
