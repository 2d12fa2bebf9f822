//! Tenant store registry: one isolated SQLite database per organization.
//!
//! Databases live under a single data root as `org-<name>.db` files. Handles
//! are created lazily on first access, initialized exactly once, and cached
//! for the process lifetime.

use crate::error::{Error, Result};
use crate::instances::InstanceCollection;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Database file prefix marking a tenant store as ours.
pub const DATABASE_PREFIX: &str = "org-";

/// Organization used when a caller supplies none.
pub const DEFAULT_ORGANIZATION: &str = "default";

/// Normalize an optional organization to the key used for storage and
/// subscriber scoping.
#[must_use]
pub fn organization_key(organization: Option<&str>) -> String {
    match organization {
        Some(name) if !name.is_empty() => name.to_string(),
        _ => DEFAULT_ORGANIZATION.to_string(),
    }
}

/// Durable storage handle for a single organization.
pub struct TenantHandle {
    organization: String,
    pool: SqlitePool,
    instances: InstanceCollection,
}

impl TenantHandle {
    /// Organization this handle is scoped to.
    #[must_use]
    pub fn organization(&self) -> &str {
        &self.organization
    }

    /// Underlying connection pool.
    #[must_use]
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Workflow history collection for this tenant.
    #[must_use]
    pub fn instances(&self) -> &InstanceCollection {
        &self.instances
    }

    /// Health probe against this tenant's database.
    pub async fn ping(&self) -> bool {
        sqlx::query("SELECT 1").execute(&self.pool).await.is_ok()
    }
}

/// Lazily creates, initializes and caches one [`TenantHandle`] per
/// organization.
///
/// Creation is serialized behind an async mutex, so N concurrent first
/// accesses for the same organization yield the same handle and run the
/// schema setup exactly once.
pub struct TenantRegistry {
    root: PathBuf,
    handles: Mutex<HashMap<String, Arc<TenantHandle>>>,
}

impl TenantRegistry {
    /// Registry rooted at the given data directory.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            handles: Mutex::new(HashMap::new()),
        }
    }

    /// Return the cached handle for `organization`, creating and
    /// initializing it on first access.
    ///
    /// Fails fast with [`Error::Unavailable`] when the data root cannot be
    /// reached and [`Error::TenantInit`] when store setup fails; the error
    /// aborts this call only.
    pub async fn get_or_create(&self, organization: Option<&str>) -> Result<Arc<TenantHandle>> {
        let name = organization_key(organization);
        let mut handles = self.handles.lock().await;
        if let Some(handle) = handles.get(&name) {
            debug!(organization = %name, "using cached tenant store");
            return Ok(handle.clone());
        }

        // Keep tenant names filesystem-safe
        if name.contains(std::path::is_separator) || name.contains("..") {
            return Err(Error::TenantInit {
                organization: name,
                message: "organization name is not a valid database name".into(),
            });
        }

        std::fs::create_dir_all(&self.root)
            .map_err(|e| Error::Unavailable(format!("data root {}: {e}", self.root.display())))?;

        let path = self.root.join(format!("{DATABASE_PREFIX}{name}.db"));
        info!("setting up workflow storage on database '{}'", path.display());
        let url = format!("sqlite:{}?mode=rwc", path.display());
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&url)
            .await
            .map_err(|e| Error::TenantInit {
                organization: name.clone(),
                message: format!("open {}: {e}", path.display()),
            })?;

        sqlx::query("PRAGMA journal_mode=WAL")
            .execute(&pool)
            .await?;

        let instances = InstanceCollection::new(pool.clone());
        instances.migrate().await.map_err(|e| Error::TenantInit {
            organization: name.clone(),
            message: format!("schema setup: {e}"),
        })?;

        let handle = Arc::new(TenantHandle {
            organization: name.clone(),
            pool,
            instances,
        });
        handles.insert(name, handle.clone());
        Ok(handle)
    }

    /// Scoped acquisition for hot paths: get-or-create, then re-check the
    /// tenant connection before handing the handle out.
    pub async fn scoped(&self, organization: Option<&str>) -> Result<Arc<TenantHandle>> {
        let handle = self.get_or_create(organization).await?;
        if !handle.ping().await {
            return Err(Error::Unavailable(format!(
                "tenant '{}' failed health probe",
                handle.organization()
            )));
        }
        Ok(handle)
    }

    /// Enumerate organizations known to the data root, by our database
    /// naming convention.
    pub async fn list_organizations(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            // A missing root simply means no tenant was ever created.
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(names),
            Err(e) => {
                return Err(Error::Unavailable(format!(
                    "data root {}: {e}",
                    self.root.display()
                )))
            }
        };

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| Error::Unavailable(format!("data root {}: {e}", self.root.display())))?
        {
            let file_name = entry.file_name();
            let Some(file_name) = file_name.to_str() else {
                continue;
            };
            if let Some(stem) = file_name
                .strip_prefix(DATABASE_PREFIX)
                .and_then(|rest| rest.strip_suffix(".db"))
            {
                names.push(stem.to_string());
            }
        }

        names.sort();
        Ok(names)
    }
}
