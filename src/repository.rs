use crate::models::{NewUser, Role, User, UserChanges, UserListing};
use async_trait::async_trait;
use sqlx::PgPool;
use std::{collections::BTreeMap, fmt, sync::Arc};
use tokio::sync::RwLock;

/// UniqueField
///
/// The user columns carrying a uniqueness constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UniqueField {
    Username,
    Email,
}

impl UniqueField {
    /// The form field the constraint is reported against.
    pub fn field(self) -> &'static str {
        match self {
            UniqueField::Username => "username",
            UniqueField::Email => "email",
        }
    }

    /// The validation message shown for a taken value.
    pub fn message(self) -> &'static str {
        match self {
            UniqueField::Username => "Username already exists",
            UniqueField::Email => "Email already exists",
        }
    }
}

impl fmt::Display for UniqueField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.field())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    /// A write hit a uniqueness constraint the validators did not catch
    /// (typically a concurrent insert).
    #[error("{0} already exists")]
    Conflict(UniqueField),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

pub type RepositoryResult<T> = Result<T, RepositoryError>;

/// Repository Trait
///
/// Persistence contract for roles and users. Handlers, validators and the
/// session extractor only ever see `Arc<dyn Repository>`, so the Postgres
/// store and the in-memory store are interchangeable.
#[async_trait]
pub trait Repository: Send + Sync {
    // --- Roles ---
    /// All roles ordered by name.
    async fn list_roles(&self) -> RepositoryResult<Vec<Role>>;

    // --- Users ---
    async fn get_user(&self, id: i32) -> RepositoryResult<Option<User>>;
    /// The user joined with its role name. Used to resolve session identities.
    async fn get_user_with_role(&self, id: i32) -> RepositoryResult<Option<UserListing>>;
    async fn get_user_by_username(&self, username: &str) -> RepositoryResult<Option<User>>;
    async fn username_taken(&self, username: &str) -> RepositoryResult<bool>;
    async fn email_taken(&self, email: &str) -> RepositoryResult<bool>;
    /// All users with their role names, ascending by id.
    async fn list_users(&self) -> RepositoryResult<Vec<UserListing>>;

    // --- Writes ---
    async fn create_user(&self, user: NewUser) -> RepositoryResult<User>;
    /// Returns `None` when no user has this id.
    async fn update_user(&self, id: i32, changes: UserChanges) -> RepositoryResult<Option<User>>;
    /// Returns `false` when no user has this id.
    async fn delete_user(&self, id: i32) -> RepositoryResult<bool>;
}

/// RepositoryState
///
/// The shared handle stored in `AppState`.
pub type RepositoryState = Arc<dyn Repository>;

/// PostgresRepository
///
/// `Repository` backed by the `user_role` and `user_info` tables.
pub struct PostgresRepository {
    pool: PgPool,
}

impl PostgresRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Translates unique violations into `Conflict`, keyed on the constraint name
/// Postgres generates for `UNIQUE` columns (`user_info_email_key`, ...).
fn map_write_error(err: sqlx::Error) -> RepositoryError {
    if let sqlx::Error::Database(db) = &err {
        if db.is_unique_violation() {
            let field = match db.constraint() {
                Some(name) if name.contains("email") => UniqueField::Email,
                _ => UniqueField::Username,
            };
            return RepositoryError::Conflict(field);
        }
    }
    RepositoryError::Database(err)
}

const USER_COLUMNS: &str = "id, username, email, password, user_role";

#[async_trait]
impl Repository for PostgresRepository {
    async fn list_roles(&self) -> RepositoryResult<Vec<Role>> {
        let roles = sqlx::query_as::<_, Role>(
            "SELECT id, role_name FROM user_role ORDER BY role_name ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(roles)
    }

    async fn get_user(&self, id: i32) -> RepositoryResult<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM user_info WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }

    async fn get_user_with_role(&self, id: i32) -> RepositoryResult<Option<UserListing>> {
        let user = sqlx::query_as::<_, UserListing>(
            r#"
            SELECT u.id, u.username, u.email, r.role_name
            FROM user_info u
            LEFT JOIN user_role r ON r.id = u.user_role
            WHERE u.id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }

    async fn get_user_by_username(&self, username: &str) -> RepositoryResult<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM user_info WHERE username = $1"
        ))
        .bind(username)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }

    async fn username_taken(&self, username: &str) -> RepositoryResult<bool> {
        let taken = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM user_info WHERE username = $1)",
        )
        .bind(username)
        .fetch_one(&self.pool)
        .await?;
        Ok(taken)
    }

    async fn email_taken(&self, email: &str) -> RepositoryResult<bool> {
        let taken =
            sqlx::query_scalar::<_, bool>("SELECT EXISTS(SELECT 1 FROM user_info WHERE email = $1)")
                .bind(email)
                .fetch_one(&self.pool)
                .await?;
        Ok(taken)
    }

    /// LEFT JOIN so that users without a role (every self-registered account)
    /// still appear in the listing.
    async fn list_users(&self) -> RepositoryResult<Vec<UserListing>> {
        let users = sqlx::query_as::<_, UserListing>(
            r#"
            SELECT u.id, u.username, u.email, r.role_name
            FROM user_info u
            LEFT JOIN user_role r ON r.id = u.user_role
            ORDER BY u.id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(users)
    }

    async fn create_user(&self, user: NewUser) -> RepositoryResult<User> {
        sqlx::query_as::<_, User>(&format!(
            "INSERT INTO user_info (username, email, password, user_role) \
             VALUES ($1, $2, $3, $4) RETURNING {USER_COLUMNS}"
        ))
        .bind(user.username)
        .bind(user.email)
        .bind(user.password_hash)
        .bind(user.user_role)
        .fetch_one(&self.pool)
        .await
        .map_err(map_write_error)
    }

    /// COALESCE keeps the stored password and role when the change leaves
    /// them out.
    async fn update_user(&self, id: i32, changes: UserChanges) -> RepositoryResult<Option<User>> {
        sqlx::query_as::<_, User>(&format!(
            r#"
            UPDATE user_info
            SET username = $2,
                email = $3,
                password = COALESCE($4, password),
                user_role = COALESCE($5, user_role)
            WHERE id = $1
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(changes.username)
        .bind(changes.email)
        .bind(changes.password_hash)
        .bind(changes.user_role)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_write_error)
    }

    async fn delete_user(&self, id: i32) -> RepositoryResult<bool> {
        let result = sqlx::query("DELETE FROM user_info WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

// --- In-Memory Store ---

#[derive(Default)]
struct MemoryTables {
    roles: Vec<Role>,
    users: BTreeMap<i32, User>,
    last_role_id: i32,
    last_user_id: i32,
}

impl MemoryTables {
    fn conflict(&self, username: &str, email: &str, except: Option<i32>) -> Option<UniqueField> {
        let others = self.users.values().filter(|u| Some(u.id) != except);
        for user in others {
            if user.username == username {
                return Some(UniqueField::Username);
            }
            if user.email == email {
                return Some(UniqueField::Email);
            }
        }
        None
    }

    fn listing(&self, user: &User) -> UserListing {
        let role_name = user
            .user_role
            .and_then(|id| self.roles.iter().find(|r| r.id == id))
            .map(|r| r.role_name.clone());
        UserListing {
            id: user.id,
            username: user.username.clone(),
            email: user.email.clone(),
            role_name,
        }
    }
}

/// InMemoryRepository
///
/// `Repository` over process-local tables. Enforces the same uniqueness rules
/// as the SQL schema. Used by the test suite and for running without Postgres.
#[derive(Default)]
pub struct InMemoryRepository {
    tables: RwLock<MemoryTables>,
}

impl InMemoryRepository {
    /// A store seeded like the migration: `admin` (id 1) and `user` (id 2).
    pub fn with_default_roles() -> Self {
        let mut tables = MemoryTables::default();
        for name in ["admin", "user"] {
            tables.last_role_id += 1;
            tables.roles.push(Role {
                id: tables.last_role_id,
                role_name: name.to_string(),
            });
        }
        Self {
            tables: RwLock::new(tables),
        }
    }

    pub async fn insert_role(&self, role_name: &str) -> Role {
        let mut tables = self.tables.write().await;
        tables.last_role_id += 1;
        let role = Role {
            id: tables.last_role_id,
            role_name: role_name.to_string(),
        };
        tables.roles.push(role.clone());
        role
    }

    pub async fn role_by_name(&self, role_name: &str) -> Option<Role> {
        let tables = self.tables.read().await;
        tables.roles.iter().find(|r| r.role_name == role_name).cloned()
    }

    pub async fn user_count(&self) -> usize {
        self.tables.read().await.users.len()
    }
}

#[async_trait]
impl Repository for InMemoryRepository {
    async fn list_roles(&self) -> RepositoryResult<Vec<Role>> {
        let mut roles = self.tables.read().await.roles.clone();
        roles.sort_by(|a, b| a.role_name.cmp(&b.role_name));
        Ok(roles)
    }

    async fn get_user(&self, id: i32) -> RepositoryResult<Option<User>> {
        Ok(self.tables.read().await.users.get(&id).cloned())
    }

    async fn get_user_with_role(&self, id: i32) -> RepositoryResult<Option<UserListing>> {
        let tables = self.tables.read().await;
        Ok(tables.users.get(&id).map(|u| tables.listing(u)))
    }

    async fn get_user_by_username(&self, username: &str) -> RepositoryResult<Option<User>> {
        let tables = self.tables.read().await;
        Ok(tables.users.values().find(|u| u.username == username).cloned())
    }

    async fn username_taken(&self, username: &str) -> RepositoryResult<bool> {
        let tables = self.tables.read().await;
        Ok(tables.users.values().any(|u| u.username == username))
    }

    async fn email_taken(&self, email: &str) -> RepositoryResult<bool> {
        let tables = self.tables.read().await;
        Ok(tables.users.values().any(|u| u.email == email))
    }

    async fn list_users(&self) -> RepositoryResult<Vec<UserListing>> {
        let tables = self.tables.read().await;
        // BTreeMap iteration is already ascending by id.
        Ok(tables.users.values().map(|u| tables.listing(u)).collect())
    }

    async fn create_user(&self, user: NewUser) -> RepositoryResult<User> {
        let mut tables = self.tables.write().await;
        if let Some(field) = tables.conflict(&user.username, &user.email, None) {
            return Err(RepositoryError::Conflict(field));
        }
        tables.last_user_id += 1;
        let created = User {
            id: tables.last_user_id,
            username: user.username,
            email: user.email,
            password: user.password_hash,
            user_role: user.user_role,
        };
        tables.users.insert(created.id, created.clone());
        Ok(created)
    }

    async fn update_user(&self, id: i32, changes: UserChanges) -> RepositoryResult<Option<User>> {
        let mut tables = self.tables.write().await;
        if !tables.users.contains_key(&id) {
            return Ok(None);
        }
        if let Some(field) = tables.conflict(&changes.username, &changes.email, Some(id)) {
            return Err(RepositoryError::Conflict(field));
        }
        let Some(user) = tables.users.get_mut(&id) else {
            return Ok(None);
        };
        user.username = changes.username;
        user.email = changes.email;
        if let Some(hash) = changes.password_hash {
            user.password = hash;
        }
        if let Some(role) = changes.user_role {
            user.user_role = Some(role);
        }
        Ok(Some(user.clone()))
    }

    async fn delete_user(&self, id: i32) -> RepositoryResult<bool> {
        Ok(self.tables.write().await.users.remove(&id).is_some())
    }
}
