//! Repository pattern implementation for data access layer

use crate::core::error::Result;
use crate::db::manager::DatabaseManager;
use crate::plugin::types::{ProviderDescriptor, ProviderKind};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{OptionalExtension, Row};
use std::sync::Arc;

/// Generic repository trait for CRUD operations
#[async_trait]
pub trait Repository<T>: Send + Sync {
    /// Find an entity by its ID
    async fn find_by_id(&self, id: &str) -> Result<Option<T>>;

    /// Find all entities
    async fn find_all(&self) -> Result<Vec<T>>;

    /// Create a new entity
    async fn create(&self, entity: &T) -> Result<()>;

    /// Update an existing entity
    async fn update(&self, entity: &T) -> Result<()>;

    /// Delete an entity by its ID
    async fn delete(&self, id: &str) -> Result<()>;
}

const PROVIDER_COLUMNS: &str =
    "name, module, version, kind, author, description, file_extension, checksum, installed_at";

/// Persisted provider descriptors, keyed by provider name
#[derive(Clone)]
pub struct ProviderRepository {
    db: Arc<DatabaseManager>,
}

impl ProviderRepository {
    pub fn new(db: Arc<DatabaseManager>) -> Self {
        Self { db }
    }

    /// Find providers implementing the given contract kind
    pub async fn find_by_kind(&self, kind: ProviderKind) -> Result<Vec<ProviderDescriptor>> {
        self.db
            .execute(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM providers WHERE kind = ? ORDER BY name",
                    PROVIDER_COLUMNS
                ))?;
                let providers = stmt
                    .query_map([kind.as_str()], descriptor_from_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(providers)
            })
            .await
    }
}

fn conversion_error(idx: usize, e: impl std::error::Error + Send + Sync + 'static) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))
}

fn descriptor_from_row(row: &Row<'_>) -> rusqlite::Result<ProviderDescriptor> {
    let version: String = row.get(2)?;
    let kind: String = row.get(3)?;
    let installed_at: Option<String> = row.get(8)?;

    let installed_at = match installed_at {
        Some(ts) => DateTime::parse_from_rfc3339(&ts)
            .map_err(|e| conversion_error(8, e))?
            .with_timezone(&Utc),
        // Rows written before the checksum migration carry no timestamp
        None => DateTime::<Utc>::default(),
    };

    Ok(ProviderDescriptor {
        name: row.get(0)?,
        module: row.get(1)?,
        version: semver::Version::parse(&version).map_err(|e| conversion_error(2, e))?,
        kind: kind.parse().map_err(|e| conversion_error(3, e))?,
        author: row.get(4)?,
        description: row.get(5)?,
        file_extension: row.get(6)?,
        checksum: row.get(7)?,
        installed_at,
    })
}

#[async_trait]
impl Repository<ProviderDescriptor> for ProviderRepository {
    async fn find_by_id(&self, name: &str) -> Result<Option<ProviderDescriptor>> {
        let name = name.to_string();
        self.db
            .execute(move |conn| {
                Ok(conn
                    .query_row(
                        &format!("SELECT {} FROM providers WHERE name = ?", PROVIDER_COLUMNS),
                        [&name],
                        descriptor_from_row,
                    )
                    .optional()?)
            })
            .await
    }

    async fn find_all(&self) -> Result<Vec<ProviderDescriptor>> {
        self.db
            .execute(|conn| {
                let mut stmt =
                    conn.prepare(&format!("SELECT {} FROM providers ORDER BY name", PROVIDER_COLUMNS))?;
                let providers = stmt
                    .query_map([], descriptor_from_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(providers)
            })
            .await
    }

    async fn create(&self, provider: &ProviderDescriptor) -> Result<()> {
        let provider = provider.clone();
        self.db
            .execute(move |conn| {
                conn.execute(
                    &format!(
                        "INSERT INTO providers ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
                        PROVIDER_COLUMNS
                    ),
                    rusqlite::params![
                        &provider.name,
                        &provider.module,
                        provider.version.to_string(),
                        provider.kind.as_str(),
                        &provider.author,
                        &provider.description,
                        &provider.file_extension,
                        &provider.checksum,
                        provider.installed_at.to_rfc3339(),
                    ],
                )?;
                Ok(())
            })
            .await
    }

    async fn update(&self, provider: &ProviderDescriptor) -> Result<()> {
        let provider = provider.clone();
        self.db
            .execute(move |conn| {
                conn.execute(
                    "UPDATE providers SET module = ?, version = ?, kind = ?, author = ?, \
                     description = ?, file_extension = ?, checksum = ?, installed_at = ? \
                     WHERE name = ?",
                    rusqlite::params![
                        &provider.module,
                        provider.version.to_string(),
                        provider.kind.as_str(),
                        &provider.author,
                        &provider.description,
                        &provider.file_extension,
                        &provider.checksum,
                        provider.installed_at.to_rfc3339(),
                        &provider.name,
                    ],
                )?;
                Ok(())
            })
            .await
    }

    async fn delete(&self, name: &str) -> Result<()> {
        let name = name.to_string();
        self.db
            .execute(move |conn| {
                conn.execute("DELETE FROM providers WHERE name = ?", [&name])?;
                Ok(())
            })
            .await
    }
}
