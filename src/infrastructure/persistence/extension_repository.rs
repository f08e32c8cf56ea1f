//! SQLite-backed ExtensionRepository, querying through the Database engine.

use async_trait::async_trait;
use sqlx::Row;

use super::database::DatabaseHandle;
use crate::domain::extension::{Extension, ExtensionRepository, ExtensionType, RosterEntry};
use crate::domain::shared::error::{DomainError, Result};

pub struct SqliteExtensionRepository {
    db: DatabaseHandle,
}

impl SqliteExtensionRepository {
    pub fn new(db: DatabaseHandle) -> Self {
        Self { db }
    }
}

#[async_trait]
impl ExtensionRepository for SqliteExtensionRepository {
    async fn find_by_number(&self, extnbr: i64) -> Result<Option<Extension>> {
        self.db
            .query(move |pool| async move {
                let row = sqlx::query("SELECT extnbr, authname, display, type, alias, access FROM Extensions WHERE extnbr = ?")
                    .bind(extnbr)
                    .fetch_optional(&pool)
                    .await?;
                Ok(row.map(|r| Extension {
                    extnbr: r.get("extnbr"),
                    authname: r.get("authname"),
                    display: r.get("display"),
                    etype: ExtensionType::from_str(&r.get::<String, _>("type")),
                    alias: r.get("alias"),
                    access: r.get("access"),
                }))
            })
            .await
            .map_err(|e| DomainError::Internal(format!("{:?}", e)))
    }

    async fn roster(&self) -> Result<Vec<RosterEntry>> {
        self.db
            .query(move |pool| async move {
                let rows = sqlx::query(
                    "SELECT a.authname AS a, e.extnbr AS n, e.display AS d, e.type AS t \
                     FROM Extensions e JOIN Authorize a ON a.authname = e.authname \
                     ORDER BY e.extnbr",
                )
                .fetch_all(&pool)
                .await?;
                Ok(rows
                    .into_iter()
                    .map(|r| {
                        let number: i64 = r.get("n");
                        RosterEntry {
                            auth_id: r.get("a"),
                            number,
                            uri: format!("sip:{}@local", number),
                            display: r.get("d"),
                            etype: r.get("t"),
                        }
                    })
                    .collect())
            })
            .await
            .map_err(|e| DomainError::Internal(format!("{:?}", e)))
    }
}
