//! Per-field file count enforcement.

use std::collections::HashMap;

use crate::UploadError;

/// A field name that accepts files, with an optional maximum number of files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileGroup {
    pub name: String,
    pub max_count: Option<usize>,
}

impl FileGroup {
    /// Constructs a group accepting any number of files under `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            max_count: None,
        }
    }

    /// Sets the maximum number of files accepted under this name.
    pub fn max_count(mut self, max_count: usize) -> Self {
        self.max_count = Some(max_count);
        self
    }

    /// Sum of all `max_count`s, or `None` if any group is unbounded.
    pub(crate) fn max_count_sum(groups: &[FileGroup]) -> Option<u64> {
        groups.iter().try_fold(0_u64, |sum, group| {
            group
                .max_count
                .map(|max| sum.saturating_add(max as u64))
        })
    }
}

/// Counts files per field name and rejects the ones that are unexpected or over the limit.
///
/// Each file part must be checked exactly once, before anything is written for it.
#[derive(Debug)]
pub struct LimitGuard {
    /// Remaining files per field name; `None` is unbounded.
    remaining: HashMap<String, Option<usize>>,
}

impl LimitGuard {
    pub fn new(groups: &[FileGroup]) -> Self {
        let remaining = groups
            .iter()
            .map(|group| (group.name.clone(), group.max_count))
            .collect();

        Self { remaining }
    }

    /// Accepts one more file under `field_name` or returns the reason it can't be accepted.
    pub fn check(&mut self, field_name: &str) -> Result<(), UploadError> {
        let Some(remaining) = self.remaining.get_mut(field_name) else {
            return Err(UploadError::UnexpectedFile {
                field: field_name.to_owned(),
            });
        };

        match remaining {
            None => Ok(()),
            Some(0) => Err(UploadError::FileCount {
                field: Some(field_name.to_owned()),
            }),
            Some(left) => {
                *left -= 1;
                Ok(())
            }
        }
    }
}
