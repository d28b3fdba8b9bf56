//! Database implementations.

pub mod postgres;

use async_trait::async_trait;

use crate::domain::{AppError, DatabaseError, User, UserDirectory};

pub use postgres::{PostgresConfig, PostgresUserDirectory};

/// Stand-in when no user database is configured; every lookup fails, so
/// notifications go to the operator.
#[derive(Debug, Default)]
pub struct UnavailableUserDirectory;

#[async_trait]
impl UserDirectory for UnavailableUserDirectory {
    async fn find_by_user_name(&self, _user_name: &str) -> Result<User, AppError> {
        Err(AppError::Database(DatabaseError::Connection(
            "no user database configured".to_string(),
        )))
    }
}
