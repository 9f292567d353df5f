//! User rows, keyed by the identity provider's opaque subject handle.

use ar_core::types::{Role, User};
use uuid::Uuid;

use crate::{enum_from_sql, enum_to_sql, StoreDb, StoreError};

const USER_COLUMNS: &str =
    "id, token_identifier, name, email, picture_url, role, created_at, updated_at";

impl StoreDb {
    pub async fn get_user_by_token_identifier(
        &self,
        token_identifier: &str,
    ) -> Result<Option<User>, StoreError> {
        let token_identifier = token_identifier.to_string();
        self.conn()
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {USER_COLUMNS} FROM users WHERE token_identifier = ?1"
                ))?;
                let mut rows = stmt.query(rusqlite::params![token_identifier])?;
                match rows.next()? {
                    Some(row) => Ok(Some(row_to_user(row)?)),
                    None => Ok(None),
                }
            })
            .await
            .map_err(StoreError::Db)
    }

    pub async fn get_user(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        let id = id.to_string();
        self.conn()
            .call(move |conn| {
                let mut stmt =
                    conn.prepare(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"))?;
                let mut rows = stmt.query(rusqlite::params![id])?;
                match rows.next()? {
                    Some(row) => Ok(Some(row_to_user(row)?)),
                    None => Ok(None),
                }
            })
            .await
            .map_err(StoreError::Db)
    }

    pub async fn count_users(&self) -> Result<i64, StoreError> {
        self.conn()
            .call(|conn| {
                let count =
                    conn.prepare("SELECT COUNT(*) FROM users")?.query_row([], |r| r.get(0))?;
                Ok(count)
            })
            .await
            .map_err(StoreError::Db)
    }

    pub async fn insert_user(&self, user: &User) -> Result<(), StoreError> {
        let id = user.id.to_string();
        let token_identifier = user.token_identifier.clone();
        let name = user.name.clone();
        let email = user.email.clone();
        let picture_url = user.picture_url.clone();
        let role = enum_to_sql(&user.role);
        let created_at = user.created_at;
        let updated_at = user.updated_at;

        self.conn()
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO users (id, token_identifier, name, email, picture_url, role,
                        created_at, updated_at)
                     VALUES (?1,?2,?3,?4,?5,?6,?7,?8)",
                    rusqlite::params![
                        id,
                        token_identifier,
                        name,
                        email,
                        picture_url,
                        role,
                        created_at,
                        updated_at
                    ],
                )?;
                Ok(())
            })
            .await
            .map_err(StoreError::Db)
    }

    /// Refresh mutable profile fields from the identity payload.
    pub async fn update_user_profile(
        &self,
        id: Uuid,
        name: Option<String>,
        email: Option<String>,
        picture_url: Option<String>,
        now: i64,
    ) -> Result<(), StoreError> {
        let id = id.to_string();
        self.conn()
            .call(move |conn| {
                conn.execute(
                    "UPDATE users SET name = ?2, email = ?3, picture_url = ?4, updated_at = ?5
                     WHERE id = ?1",
                    rusqlite::params![id, name, email, picture_url, now],
                )?;
                Ok(())
            })
            .await
            .map_err(StoreError::Db)
    }
}

fn row_to_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
    let id_str: String = row.get(0)?;
    let role_str: String = row.get(5)?;
    Ok(User {
        id: Uuid::parse_str(&id_str).expect("valid uuid"),
        token_identifier: row.get(1)?,
        name: row.get(2)?,
        email: row.get(3)?,
        picture_url: row.get(4)?,
        role: enum_from_sql::<Role>(&role_str),
        created_at: row.get(6)?,
        updated_at: row.get(7)?,
    })
}
