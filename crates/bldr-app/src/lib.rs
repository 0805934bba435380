//! Where bldr keeps its state on disk.

use std::path::{Path, PathBuf};

use directories::ProjectDirs;

const APP_QUALIFIER: &str = "dev";
const APP_ORGANIZATION: &str = "bldr";
const APP_NAME: &str = "bldr";
const DB_FILENAME: &str = "bldr.sqlite3";
const PROJECTS_DIRNAME: &str = "projects";

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("could not resolve user data directory")]
    MissingUserDataDir,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// App-local user data directory.
pub fn user_data_dir() -> Result<PathBuf> {
    let dirs = ProjectDirs::from(APP_QUALIFIER, APP_ORGANIZATION, APP_NAME)
        .ok_or(Error::MissingUserDataDir)?;
    Ok(dirs.data_local_dir().to_path_buf())
}

/// Resolved on-disk locations. Either path may be overridden; the rest
/// default to the user data directory.
#[derive(Debug, Clone)]
pub struct AppPaths {
    pub db_path: PathBuf,
    pub projects_dir: PathBuf,
}

impl AppPaths {
    pub fn resolve(db_path: Option<&Path>, projects_dir: Option<&Path>) -> Result<Self> {
        let data_dir = match (db_path, projects_dir) {
            (Some(_), Some(_)) => None,
            _ => Some(user_data_dir()?),
        };
        let default = |name: &str| data_dir.as_ref().map(|dir| dir.join(name));

        let paths = Self {
            db_path: db_path
                .map(Path::to_path_buf)
                .or_else(|| default(DB_FILENAME))
                .ok_or(Error::MissingUserDataDir)?,
            projects_dir: projects_dir
                .map(Path::to_path_buf)
                .or_else(|| default(PROJECTS_DIRNAME))
                .ok_or(Error::MissingUserDataDir)?,
        };
        Ok(paths)
    }

    /// Create the directories the paths live in.
    pub fn ensure(&self) -> Result<()> {
        if let Some(parent) = self.db_path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::create_dir_all(&self.projects_dir)?;
        Ok(())
    }
}
