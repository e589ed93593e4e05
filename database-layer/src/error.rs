use error_common::EngineError;

/// Map a sqlx failure to the engine taxonomy. The repository layer
/// surfaces `NotFound`, `AlreadyExists` and `Internal` only; `what`
/// names the entity for the sanitized message.
pub(crate) fn map_sqlx(err: sqlx::Error, what: &str) -> EngineError {
    if matches!(err, sqlx::Error::RowNotFound) {
        return EngineError::not_found(format!("{what} not found"));
    }

    let unique = matches!(&err, sqlx::Error::Database(db) if db.is_unique_violation());
    if unique {
        EngineError::already_exists(format!("{what} already exists")).with_source(err)
    } else {
        EngineError::internal(format!("database error on {what}")).with_source(err)
    }
}

pub(crate) fn detached(what: &str) -> EngineError {
    EngineError::internal(format!("context has no backing pool for {what}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use error_common::ErrorKind;

    #[test]
    fn test_row_not_found_maps_to_not_found() {
        let err = map_sqlx(sqlx::Error::RowNotFound, "secret");
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(err.to_string(), "not_found: secret not found");
    }

    #[test]
    fn test_io_maps_to_internal() {
        let io = sqlx::Error::Io(std::io::Error::new(
            std::io::ErrorKind::ConnectionReset,
            "reset",
        ));
        assert_eq!(map_sqlx(io, "secret").kind(), ErrorKind::Internal);
    }
}
