//! Search-category policies: pick a branch (or branches) to read an
//! existing path from.

use std::path::Path;
use std::sync::Arc;

use rand::seq::IndexedRandom;

use super::{branches_containing, empty_search_error, Category, Policy};
use crate::branch::Branch;
use crate::error::Result;
use crate::Branches;

pub(crate) fn by_name(name: &str) -> Option<Arc<dyn Policy>> {
    match name {
        "ff" => Some(Arc::new(FirstFound)),
        "all" => Some(Arc::new(All)),
        "newest" => Some(Arc::new(Newest)),
        "rand" => Some(Arc::new(Rand)),
        _ => None,
    }
}

/// `ff`: the first branch (in configured order) containing the path.
pub struct FirstFound;

impl Policy for FirstFound {
    fn name(&self) -> &'static str {
        "ff"
    }

    fn category(&self) -> Category {
        Category::Search
    }

    fn select(&self, branches: &Branches, relpath: &Path) -> Result<Vec<Arc<Branch>>> {
        branches
            .iter()
            .find(|b| b.contains(relpath))
            .cloned()
            .map(|b| vec![b])
            .ok_or_else(empty_search_error)
    }
}

/// `all`: every branch containing the path, in order — used by handlers
/// that need to read every copy (e.g. readdir merging).
pub struct All;

impl Policy for All {
    fn name(&self) -> &'static str {
        "all"
    }

    fn category(&self) -> Category {
        Category::Search
    }

    fn select(&self, branches: &Branches, relpath: &Path) -> Result<Vec<Arc<Branch>>> {
        let found = branches_containing(branches, relpath);
        if found.is_empty() {
            Err(empty_search_error())
        } else {
            Ok(found)
        }
    }
}

/// `newest`: the branch whose copy of the path has the most recent mtime.
pub struct Newest;

impl Policy for Newest {
    fn name(&self) -> &'static str {
        "newest"
    }

    fn category(&self) -> Category {
        Category::Search
    }

    fn select(&self, branches: &Branches, relpath: &Path) -> Result<Vec<Arc<Branch>>> {
        branches_containing(branches, relpath)
            .into_iter()
            .max_by_key(|b| b.mtime_of(relpath))
            .map(|b| vec![b])
            .ok_or_else(empty_search_error)
    }
}

/// `rand`: a uniformly random branch among those containing the path.
pub struct Rand;

impl Policy for Rand {
    fn name(&self) -> &'static str {
        "rand"
    }

    fn category(&self) -> Category {
        Category::Search
    }

    fn select(&self, branches: &Branches, relpath: &Path) -> Result<Vec<Arc<Branch>>> {
        let found = branches_containing(branches, relpath);
        if found.is_empty() {
            return Err(empty_search_error());
        }
        let mut rng = rand::rng();
        Ok(vec![found.choose(&mut rng).expect("non-empty checked above").clone()])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::branch::BranchMode;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn first_found_picks_earliest_branch_containing_path() {
        let a = tempdir().unwrap();
        let b = tempdir().unwrap();
        fs::write(b.path().join("x"), b"hi").unwrap();
        let branches = Branches::flat(vec![
            crate::branch::Branch::new(a.path(), BranchMode::Rw, 0),
            crate::branch::Branch::new(b.path(), BranchMode::Rw, 0),
        ]);
        let picked = FirstFound.select(&branches, Path::new("x")).unwrap();
        assert_eq!(picked.len(), 1);
        assert_eq!(picked[0].path(), b.path());
    }

    #[test]
    fn all_returns_every_branch_with_the_path() {
        let a = tempdir().unwrap();
        let b = tempdir().unwrap();
        fs::write(a.path().join("x"), b"hi").unwrap();
        fs::write(b.path().join("x"), b"hi").unwrap();
        let branches = Branches::flat(vec![
            crate::branch::Branch::new(a.path(), BranchMode::Rw, 0),
            crate::branch::Branch::new(b.path(), BranchMode::Rw, 0),
        ]);
        let picked = All.select(&branches, Path::new("x")).unwrap();
        assert_eq!(picked.len(), 2);
    }

    #[test]
    fn missing_path_is_not_found() {
        let a = tempdir().unwrap();
        let branches = Branches::flat(vec![crate::branch::Branch::new(a.path(), BranchMode::Rw, 0)]);
        assert_eq!(
            FirstFound.select(&branches, Path::new("missing")).unwrap_err(),
            crate::error::ErrorKind::NotFound
        );
    }
}
