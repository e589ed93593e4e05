use error_common::{EngineError, EngineResult};

/// Validated pagination window. Offset is non-negative and limit sits
/// in `[1, 1000]`; anything else is a `ValidationError` before any SQL
/// runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    offset: i64,
    limit: i64,
}

impl Page {
    pub const MAX_LIMIT: i64 = 1000;

    pub fn new(offset: i64, limit: i64) -> EngineResult<Self> {
        if offset < 0 {
            return Err(EngineError::validation("offset must be non-negative"));
        }
        if limit < 1 || limit > Self::MAX_LIMIT {
            return Err(EngineError::validation(format!(
                "limit must be between 1 and {}",
                Self::MAX_LIMIT
            )));
        }
        Ok(Self { offset, limit })
    }

    pub fn offset(&self) -> i64 {
        self.offset
    }

    pub fn limit(&self) -> i64 {
        self.limit
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use error_common::ErrorKind;

    #[test]
    fn test_valid_window() {
        let page = Page::new(0, 10).unwrap();
        assert_eq!(page.offset(), 0);
        assert_eq!(page.limit(), 10);
        assert!(Page::new(5000, 1000).is_ok());
    }

    #[test]
    fn test_rejects_out_of_range() {
        assert_eq!(
            Page::new(-1, 10).unwrap_err().kind(),
            ErrorKind::ValidationError
        );
        assert_eq!(
            Page::new(0, 0).unwrap_err().kind(),
            ErrorKind::ValidationError
        );
        assert_eq!(
            Page::new(0, 1001).unwrap_err().kind(),
            ErrorKind::ValidationError
        );
    }
}
