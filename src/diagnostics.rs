//! Multi-error aggregation for per-file and per-run diagnostics.
//!
//! Validation failures never abort sibling checks; instead they accumulate
//! into a [`Diagnostics`] container which flattens nested composites and
//! renders as `N errors: e1; e2; …` when more than one error is present.

use crate::error::{CheckError, ErrorKind};

/// Error accumulator. `add` flattens nested [`CheckError::Multi`] values so
/// the container always holds leaf (possibly context-wrapped) errors.
#[derive(Debug, Default)]
pub struct Diagnostics {
    errs: Vec<CheckError>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an error. Nested composites are flattened into this container.
    pub fn add(&mut self, err: CheckError) {
        match err {
            CheckError::Multi(errs) => {
                for e in errs {
                    self.add(e);
                }
            }
            other => self.errs.push(other),
        }
    }

    /// Add the error of a result, if any.
    pub fn add_result<T>(&mut self, res: Result<T, CheckError>) {
        if let Err(err) = res {
            self.add(err);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.errs.is_empty()
    }

    pub fn len(&self) -> usize {
        self.errs.len()
    }

    /// Count accumulated leaf errors matching the kind.
    pub fn count(&self, kind: ErrorKind) -> usize {
        self.errs.iter().map(|e| e.count_kind(kind)).sum()
    }

    /// Whether any accumulated error matches the kind.
    pub fn contains(&self, kind: ErrorKind) -> bool {
        self.errs.iter().any(|e| e.is_kind(kind))
    }

    /// Consume the container: `None` when empty, otherwise the combined
    /// error.
    pub fn into_err(self) -> Option<CheckError> {
        if self.errs.is_empty() {
            None
        } else {
            Some(CheckError::Multi(self.errs))
        }
    }

    /// Consume the container into a `Result`, `Ok(())` when empty.
    pub fn into_result(self) -> Result<(), CheckError> {
        match self.into_err() {
            None => Ok(()),
            Some(err) => Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_yields_ok() {
        let diag = Diagnostics::new();
        assert!(diag.is_empty());
        assert!(diag.into_err().is_none());
    }

    #[test]
    fn test_add_flattens_nested_multi() {
        let mut diag = Diagnostics::new();
        diag.add(CheckError::Multi(vec![
            CheckError::FileNotFound,
            CheckError::Multi(vec![CheckError::IdNotFound, CheckError::Cancelled]),
        ]));
        diag.add(CheckError::Cancelled);
        assert_eq!(diag.len(), 4);

        let err = diag.into_err().unwrap();
        assert!(err.to_string().starts_with("4 errors: "));
    }

    #[test]
    fn test_add_result_ignores_ok() {
        let mut diag = Diagnostics::new();
        diag.add_result::<()>(Ok(()));
        diag.add_result::<()>(Err(CheckError::FileNotFound));
        assert_eq!(diag.len(), 1);
    }

    #[test]
    fn test_count_by_kind() {
        let mut diag = Diagnostics::new();
        diag.add(CheckError::FileNotFound.wrap("docs/a.md:1"));
        diag.add(CheckError::IdNotFound.wrap("docs/a.md:4"));
        diag.add(CheckError::NotAccessible {
            url: "https://example.com/x".to_string(),
            status: 404,
        });
        assert_eq!(diag.count(ErrorKind::LocalLink), 2);
        assert_eq!(diag.count(ErrorKind::RemoteLink), 1);
        assert!(diag.contains(ErrorKind::RemoteLink));
        assert!(!diag.contains(ErrorKind::Mail));
    }
}
