use diesel::result::{DatabaseErrorKind, Error as DieselError};

/// Lowercase substrings that mark an error as a temporary connectivity
/// failure. Matched against the full formatted error chain.
pub const TRANSIENT_MESSAGE_MARKERS: &[&str] = &[
    "connection reset",
    "connection refused",
    "connection closed",
    "broken pipe",
    "timed out",
    "timeout",
    "server closed the connection",
    "terminating connection",
    "unexpected eof",
    "could not connect",
    "no route to host",
    "network is unreachable",
];

/// Postgres SQLSTATE codes for connection exceptions (class 08) and
/// administrator-initiated shutdowns (57P0x). Some drivers only surface
/// these inside the message text, so they are matched as substrings too.
pub const TRANSIENT_SQLSTATE_CODES: &[&str] = &[
    "08000", "08001", "08003", "08004", "08006", "57p01", "57p02", "57p03",
];

/// Classifies an error as transient (worth retrying) or permanent.
///
/// Diesel errors are decided structurally where possible: a closed
/// connection or a broken transaction manager is transient, while
/// `NotFound` and constraint violations are permanent no matter what
/// their message says. Postgres surfaces server-side connection drops
/// (the 57P01 admin-shutdown family among them) as
/// `DatabaseErrorKind::Unknown`, so unrecognized kinds are decided by
/// their message against the marker tables, as is everything else.
pub fn is_transient(err: &anyhow::Error) -> bool {
    if let Some(db_err) = err.downcast_ref::<DieselError>() {
        return match db_err {
            DieselError::DatabaseError(DatabaseErrorKind::ClosedConnection, _) => true,
            DieselError::DatabaseError(
                DatabaseErrorKind::UniqueViolation
                | DatabaseErrorKind::ForeignKeyViolation
                | DatabaseErrorKind::NotNullViolation
                | DatabaseErrorKind::CheckViolation,
                _,
            ) => false,
            DieselError::DatabaseError(_, info) => message_is_transient(info.message()),
            DieselError::NotFound => false,
            DieselError::BrokenTransactionManager => true,
            other => message_is_transient(&other.to_string()),
        };
    }
    message_is_transient(&format!("{err:#}"))
}

/// Marker-table check on a raw error message.
pub fn message_is_transient(message: &str) -> bool {
    let message = message.to_ascii_lowercase();
    TRANSIENT_MESSAGE_MARKERS
        .iter()
        .chain(TRANSIENT_SQLSTATE_CODES)
        .any(|marker| message.contains(marker))
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    fn database_error(kind: DatabaseErrorKind, message: &str) -> anyhow::Error {
        anyhow::Error::from(DieselError::DatabaseError(kind, Box::new(message.to_string())))
    }

    #[test]
    fn connection_markers_are_transient() {
        assert!(is_transient(&anyhow!("Connection reset by peer")));
        assert!(is_transient(&anyhow!("error: Broken pipe (os error 32)")));
        assert!(is_transient(&anyhow!("operation timed out")));
        assert!(is_transient(&anyhow!("server closed the connection unexpectedly")));
    }

    #[test]
    fn sqlstate_codes_are_transient() {
        assert!(is_transient(&anyhow!("FATAL: SQLSTATE 57P01 terminating connection")));
        assert!(is_transient(&anyhow!("connection exception: 08006")));
    }

    #[test]
    fn unrelated_errors_are_permanent() {
        assert!(!is_transient(&anyhow!("invalid input syntax for type uuid")));
        assert!(!is_transient(&anyhow!("permission denied for table orders")));
    }

    #[test]
    fn closed_connection_is_transient() {
        let err = database_error(DatabaseErrorKind::ClosedConnection, "connection closed");
        assert!(is_transient(&err));
    }

    #[test]
    fn constraint_violations_are_permanent_even_with_markers() {
        // Structural classification wins over the message text.
        let err = database_error(
            DatabaseErrorKind::UniqueViolation,
            "duplicate key while connection reset",
        );
        assert!(!is_transient(&err));
    }

    #[test]
    fn admin_shutdown_surfaced_as_unknown_kind_is_transient() {
        // Postgres reports 57P01 with an Unknown kind, not ClosedConnection.
        let err = database_error(
            DatabaseErrorKind::Unknown,
            "terminating connection due to administrator command",
        );
        assert!(is_transient(&err));
    }

    #[test]
    fn unknown_kind_with_unrelated_message_is_permanent() {
        let err = database_error(DatabaseErrorKind::Unknown, "division by zero");
        assert!(!is_transient(&err));
    }

    #[test]
    fn not_found_is_permanent() {
        assert!(!is_transient(&anyhow::Error::from(DieselError::NotFound)));
    }

    #[test]
    fn markers_match_case_insensitively_through_the_chain() {
        let root = anyhow!("Connection refused (os error 111)");
        let wrapped = root.context("failed to check out database connection");
        assert!(is_transient(&wrapped));
    }
}
