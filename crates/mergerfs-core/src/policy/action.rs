//! Action-category policies: pick the branches a mutation on an *existing*
//! path applies to (chmod, chown, unlink, rmdir, truncate, utimens, ...).
//!
//! Grounded on `original_source/src/category.hpp`'s `Action` function list
//! and its multi-branch aggregation rule: when a policy selects more than
//! one branch, the operation is applied to all of them and the router aggregates
//! one-success-wins — any branch succeeding is enough, and the error
//! reported on total failure is the one the Search policy would have
//! produced for the same path.

use std::path::Path;
use std::sync::Arc;

use super::{branches_eligible_for_action, empty_action_error, Category, Policy};
use crate::branch::Branch;
use crate::error::Result;
use crate::Branches;

pub(crate) fn by_name(name: &str) -> Option<Arc<dyn Policy>> {
 match name {
 "ff" => Some(Arc::new(FirstFound)),
 "all" => Some(Arc::new(All)),
 _ => None,
 }
}

/// `ff`: the first eligible branch (in configured order) containing the
/// path.
pub struct FirstFound;

impl Policy for FirstFound {
 fn name(&self) -> &'static str {
 "ff"
 }

 fn category(&self) -> Category {
 Category::Action
 }

 fn select(&self, branches: &Branches, relpath: &Path) -> Result<Vec<Arc<Branch>>> {
 branches_eligible_for_action(branches, relpath)
 .into_iter()
 .next()
 .map(|b| vec![b])
 .ok_or_else(|| empty_action_error(branches, relpath))
 }
}

/// `all`: every eligible branch containing the path — the default for
/// operations that must stay consistent across every copy (chmod, chown,
/// utimens).
pub struct All;

impl Policy for All {
 fn name(&self) -> &'static str {
 "all"
 }

 fn category(&self) -> Category {
 Category::Action
 }

 fn select(&self, branches: &Branches, relpath: &Path) -> Result<Vec<Arc<Branch>>> {
 let found = branches_eligible_for_action(branches, relpath);
 if found.is_empty() {
 Err(empty_action_error(branches, relpath))
 } else {
 Ok(found)
 }
 }
}

#[cfg(test)]
mod tests {
 use super::*;
 use crate::branch::BranchMode;
 use std::fs;
 use tempfile::tempdir;

 #[test]
 fn all_skips_read_only_branches() {
 let rw = tempdir().unwrap();
 let ro = tempdir().unwrap();
 fs::write(rw.path().join("x"), b"hi").unwrap();
 fs::write(ro.path().join("x"), b"hi").unwrap();
 let branches = Branches::flat(vec![
 crate::branch::Branch::new(rw.path(), BranchMode::Rw, 0),
 crate::branch::Branch::new(ro.path(), BranchMode::Ro, 0),
 ]);
 let picked = All.select(&branches, Path::new("x")).unwrap();
 assert_eq!(picked.len(), 1);
 assert_eq!(picked[0].path(), rw.path());
 }

 #[test]
 fn all_readonly_reports_readonly_not_notfound() {
 let ro = tempdir().unwrap();
 fs::write(ro.path().join("x"), b"hi").unwrap();
 let branches = Branches::flat(vec![crate::branch::Branch::new(ro.path(), BranchMode::Ro, 0)]);
 assert_eq!(
 All.select(&branches, Path::new("x")).unwrap_err(),
 crate::error::ErrorKind::ReadOnlyFs
 );
 }

 #[test]
 fn missing_everywhere_is_not_found() {
 let a = tempdir().unwrap();
 let branches = Branches::flat(vec![crate::branch::Branch::new(a.path(), BranchMode::Rw, 0)]);
 assert_eq!(
 All.select(&branches, Path::new("missing")).unwrap_err(),
 crate::error::ErrorKind::NotFound
 );
 }
}
