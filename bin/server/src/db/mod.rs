//! Database repositories for the fleetdesk server.
//!
//! This module provides data access for:
//! - Local users and their third-party links
//! - Bearer tokens and login logs
//! - Cluster-wide named locks

pub mod link;
pub mod lock;
pub mod token;
pub mod user;

pub use link::PgLinkRepository;
pub use lock::PgAdvisoryLock;
pub use token::{IssuedToken, LoginLogEntry, TokenRepository};
pub use user::PgUserRepository;

use fleetdesk_oauth::{Constraint, StorageError};

/// Maps a sqlx error to a storage error, recognizing the unique constraints
/// the link rules depend on.
pub(crate) fn storage_error(e: sqlx::Error) -> StorageError {
    if let sqlx::Error::Database(db_err) = &e
        && db_err.is_unique_violation()
        && let Some(constraint) = db_err.constraint().and_then(constraint_from_name)
    {
        return StorageError::Conflict { constraint };
    }
    StorageError::Database {
        details: e.to_string(),
    }
}

fn constraint_from_name(name: &str) -> Option<Constraint> {
    match name {
        "users_username_key" => Some(Constraint::Username),
        "user_thirds_op_open_id_key" => Some(Constraint::ExternalIdentity),
        "user_thirds_user_id_op_key" => Some(Constraint::UserProvider),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_constraint_names_map_to_constraints() {
        assert_eq!(
            constraint_from_name("users_username_key"),
            Some(Constraint::Username)
        );
        assert_eq!(
            constraint_from_name("user_thirds_op_open_id_key"),
            Some(Constraint::ExternalIdentity)
        );
        assert_eq!(
            constraint_from_name("user_thirds_user_id_op_key"),
            Some(Constraint::UserProvider)
        );
        assert_eq!(constraint_from_name("user_tokens_token_key"), None);
    }

    #[test]
    fn non_database_errors_are_plain_failures() {
        let err = storage_error(sqlx::Error::RowNotFound);
        assert!(matches!(err, StorageError::Database { .. }));
    }
}
