use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use bldr_app::AppPaths;
use bldr_core::backends::RemoteCommandRunner;
use bldr_core::{BuildCoordinator, DirectoryProjects};
use bldr_db::{SharedStore, Store};
use bldr_llm_registry::Registry;

use crate::config::GlobalArgs;

/// Everything a subcommand needs, wired from the resolved configuration.
pub struct App {
    pub store: SharedStore,
    pub coordinator: BuildCoordinator,
    /// Remote command sandbox, when one is configured.
    pub sandbox: Option<RemoteCommandRunner>,
}

impl App {
    pub fn open(global: &GlobalArgs) -> Result<Self> {
        let paths = AppPaths::resolve(global.db.as_deref(), global.projects_dir.as_deref())?;
        paths.ensure()?;

        let store = Store::open(&paths.db_path)
            .with_context(|| format!("opening database {}", paths.db_path.display()))?
            .into_shared();

        let mut projects = DirectoryProjects::new(&paths.projects_dir)
            .with_command_timeout(Duration::from_secs(global.sandbox_timeout_sec));
        let sandbox = match &global.sandbox_url {
            Some(url) => {
                tracing::info!(url = %url, "running commands in the remote sandbox");
                Some(RemoteCommandRunner::new(url.as_str())?)
            }
            None => None,
        };
        if let Some(sandbox) = &sandbox {
            projects = projects.with_sandbox(sandbox.clone());
        }

        let coordinator = BuildCoordinator::new(
            Arc::new(registry(&store)),
            Arc::new(projects),
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            global.coordinator_config(),
        );

        tracing::debug!(
            db = %paths.db_path.display(),
            projects = %paths.projects_dir.display(),
            "app ready"
        );
        Ok(Self {
            store,
            coordinator,
            sandbox,
        })
    }

    pub fn registry(&self) -> &Registry {
        self.coordinator.registry()
    }
}

/// All built-in providers, with stored keys taking precedence over the
/// environment.
pub fn registry(store: &SharedStore) -> Registry {
    let mut registry = Registry::new();
    registry.add_credential_resolver(Arc::new(store.clone()));
    bldr_llm_openai::register(&mut registry);
    bldr_llm_openai::register_compatible(&mut registry);
    registry
}
