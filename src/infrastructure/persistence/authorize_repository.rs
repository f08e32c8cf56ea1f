//! SQLite-backed AuthorizeRepository.

use async_trait::async_trait;
use sqlx::Row;

use super::database::DatabaseHandle;
use crate::domain::authorize::{Authorize, AuthorizeRepository, AuthorizeType};
use crate::domain::shared::error::{DomainError, Result};
use crate::infrastructure::protocols::sip::digest::DigestAlgorithm;

pub struct SqliteAuthorizeRepository {
    db: DatabaseHandle,
}

impl SqliteAuthorizeRepository {
    pub fn new(db: DatabaseHandle) -> Self {
        Self { db }
    }
}

#[async_trait]
impl AuthorizeRepository for SqliteAuthorizeRepository {
    async fn find_by_authname(&self, authname: &str) -> Result<Option<Authorize>> {
        let authname = authname.to_string();
        self.db
            .query(move |pool| async move {
                let row = sqlx::query(
                    "SELECT authname, realm, digest, secret, fullname, type, access FROM Authorize WHERE authname = ?",
                )
                .bind(&authname)
                .fetch_optional(&pool)
                .await?;
                Ok(row.map(|r| Authorize {
                    authname: r.get("authname"),
                    realm: r.get("realm"),
                    algorithm: DigestAlgorithm::parse(&r.get::<String, _>("digest")).unwrap_or(DigestAlgorithm::Md5),
                    secret: r.get("secret"),
                    fullname: r.get("fullname"),
                    atype: AuthorizeType::from_str(&r.get::<String, _>("type")),
                    access: r.get("access"),
                }))
            })
            .await
            .map_err(|e| DomainError::Internal(format!("{:?}", e)))
    }

    async fn upsert(&self, row: &Authorize) -> Result<()> {
        let row = row.clone();
        self.db
            .query(move |pool| async move {
                sqlx::query(
                    "INSERT INTO Authorize(authname, realm, digest, secret, fullname, type, access) \
                     VALUES (?, ?, ?, ?, ?, ?, ?) \
                     ON CONFLICT(authname) DO UPDATE SET \
                     realm = excluded.realm, digest = excluded.digest, secret = excluded.secret, \
                     fullname = excluded.fullname, type = excluded.type, access = excluded.access",
                )
                .bind(&row.authname)
                .bind(&row.realm)
                .bind(row.algorithm.as_str())
                .bind(&row.secret)
                .bind(&row.fullname)
                .bind(row.atype.as_str())
                .bind(row.access)
                .execute(&pool)
                .await?;
                Ok(())
            })
            .await
            .map_err(|e| DomainError::Internal(format!("{:?}", e)))
    }
}
