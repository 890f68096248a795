//! Datasource registry.
//!
//! Maps datasource names to connection handles. The registry is built once at
//! start-up and then only read: handles are never added or removed afterwards,
//! so it can be shared behind an `Arc` without locking.

use crate::config::DEFAULT_DATASOURCE_NAME;
use crate::db::dialect::DialectRegistry;
use crate::db::pool::DbPool;
use crate::error::{DbError, DbResult};
use crate::models::ConnectionProfile;
use std::collections::HashMap;
use tracing::{error, info};

#[derive(Debug, Clone)]
pub struct DatasourceRegistry<H = DbPool> {
    handles: HashMap<String, H>,
    default_name: String,
}

impl<H> DatasourceRegistry<H> {
    /// Build a registry from handles that are already open.
    ///
    /// Fails on a duplicate name.
    pub fn from_handles<I, S>(handles: I) -> DbResult<Self>
    where
        I: IntoIterator<Item = (S, H)>,
        S: Into<String>,
    {
        let mut map = HashMap::new();
        for (name, handle) in handles {
            let name = name.into();
            if map.contains_key(&name) {
                return Err(DbError::duplicate_datasource(name));
            }
            map.insert(name, handle);
        }
        Ok(Self {
            handles: map,
            default_name: DEFAULT_DATASOURCE_NAME.to_string(),
        })
    }

    /// Use `name` instead of `DEFAULT` for [`default_connection`](Self::default_connection).
    pub fn with_default_name(mut self, name: impl Into<String>) -> Self {
        self.default_name = name.into();
        self
    }

    pub fn default_name(&self) -> &str {
        &self.default_name
    }

    /// Get the handle registered under `name`.
    pub fn get(&self, name: &str) -> DbResult<&H> {
        self.handles.get(name).ok_or_else(|| {
            error!(datasource = %name, "Not found connection of datasource");
            DbError::connection_not_found(name)
        })
    }

    /// Get the handle registered under the default name.
    pub fn default_connection(&self) -> DbResult<&H> {
        self.get(&self.default_name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handles.contains_key(name)
    }

    /// Whether a handle is registered under the default name.
    pub fn has_default(&self) -> bool {
        self.contains(&self.default_name)
    }

    /// Registered datasource names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.handles.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}

impl DatasourceRegistry<DbPool> {
    /// Open one pool per profile.
    ///
    /// Fail-fast: the first error closes every pool opened so far and is
    /// returned, so no partially built registry escapes.
    pub async fn connect<I>(profiles: I, dialects: &DialectRegistry) -> DbResult<Self>
    where
        I: IntoIterator<Item = (String, ConnectionProfile)>,
    {
        let mut opened: Vec<(String, DbPool)> = Vec::new();

        for (name, profile) in profiles {
            let result = if opened.iter().any(|(existing, _)| *existing == name) {
                Err(DbError::duplicate_datasource(&name))
            } else {
                dialects.open(&name, &profile).await
            };

            match result {
                Ok(pool) => {
                    info!(
                        datasource = %name,
                        dialect = %profile.dialect,
                        address = %profile.target(),
                        "Database connection created"
                    );
                    opened.push((name, pool));
                }
                Err(e) => {
                    error!(datasource = %name, error = %e, "Got error when opening connection to datasource");
                    for (_, pool) in &opened {
                        pool.close().await;
                    }
                    return Err(e);
                }
            }
        }

        Self::from_handles(opened)
    }

    /// Close every pool. Handles stay registered but reject new work.
    pub async fn close_all(&self) {
        for (name, pool) in &self.handles {
            info!(datasource = %name, "Closing connection");
            pool.close().await;
        }
        info!("All connections closed");
    }
}
