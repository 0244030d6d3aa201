//! The policy engine: branch selection for every filesystem operation.
//!
//! Grounded on `original_source/src/category.hpp` for the three-category
//! split (Search/Action/Create) and on the naming and semantics of the
//! concrete policies themselves (`func_*_mfs.cpp`-style metric policies and
//! their `ep*`/`msp*` existing-path/path-preserving variants), reimplemented
//! as a `Policy` trait object per branch-selection call rather than as a
//! per-syscall C function table.
//!
//! A [`Policy`] only ever sees the branch-set snapshot and a relative path;
//! it never touches the node table or performs I/O beyond the cheap
//! existence/space probes `Branch` exposes, so selection is trivially
//! testable without a mounted filesystem.

mod action;
mod create;
mod search;

pub use action::*;
pub use create::*;
pub use search::*;

use std::path::Path;
use std::sync::Arc;

use crate::branch::Branch;
use crate::error::{ErrorKind, Result};
use crate::Branches;

/// Which of the three operation categories a policy applies to.
///
/// Search policies pick a branch to read from, Action policies pick the
/// branches a mutation on an existing path applies to, Create policies pick
/// the branch a brand-new path is created on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
 Search,
 Action,
 Create,
}

/// Selects zero or more branches for one filesystem operation.
///
/// Implementations are pure functions of the branch-set snapshot and the
/// relative path: no interior mutability, no I/O beyond `Branch`'s own
/// cheap probes. `select` returning an empty `Vec` with `Ok` never happens —
/// an empty result is always reported as the appropriate [`ErrorKind`].
pub trait Policy: Send + Sync {
 /// The control-file name this policy is selected by (e.g. `"mfs"`,
 /// `"epall"`).
 fn name(&self) -> &'static str;

 fn category(&self) -> Category;

 /// Chooses the branches `relpath` should act against.
 fn select(&self, branches: &Branches, relpath: &Path) -> Result<Vec<Arc<Branch>>>;
}

/// Branches (in iteration order) whose backing store already contains
/// `relpath`, with no mode filtering — used by Search policies, which may
/// read from a read-only or no-create branch.
pub(crate) fn branches_containing<'a>(
 branches: &'a Branches,
 relpath: &Path,
) -> Vec<Arc<Branch>> {
 branches.iter().filter(|b| b.contains(relpath)).cloned().collect()
}

/// Branches containing `relpath` that also allow further action on it
/// (not read-only, not an explicitly read-only-mode branch).
pub(crate) fn branches_eligible_for_action(branches: &Branches, relpath: &Path) -> Vec<Arc<Branch>> {
 branches
 .iter()
 .filter(|b| b.contains(relpath) && b.eligible_for_action())
 .cloned()
 .collect()
}

/// Branches eligible to create `relpath`: writable mode, not observed
/// read-only, above `min_free_space`.
///
/// If this set is empty because every writable branch is merely below its
/// free-space floor (not because none are writable), the caller should
/// retry with [`branches_eligible_for_create_ignoring_space`] before giving
/// up.
pub(crate) fn branches_eligible_for_create(branches: &Branches) -> Vec<Arc<Branch>> {
 branches.iter().filter(|b| b.eligible_for_create()).cloned().collect()
}

/// As [`branches_eligible_for_create`], but ignoring the `min_free_space`
/// floor — the fallback tier used when no branch clears it.
pub(crate) fn branches_eligible_for_create_ignoring_space(branches: &Branches) -> Vec<Arc<Branch>> {
 branches
 .iter()
 .filter(|b| b.mode().allows_create() && !b.is_read_only_fs())
 .cloned()
 .collect()
}

/// Branches eligible to create `relpath` where `relpath` (the file itself,
/// not just its parent) already exists elsewhere in the union — the `ep*`
/// ("existing path") policy family.
pub(crate) fn branches_eligible_existing_path(branches: &Branches, relpath: &Path) -> Vec<Arc<Branch>> {
 branches
 .iter()
 .filter(|b| b.eligible_for_create() && b.contains(relpath))
 .cloned()
 .collect()
}

/// Branches eligible to create `relpath` under the `msp*` ("most shared
/// path", path-preserving) policy family: climb `relpath` upward — trying
/// the full path first, exactly like [`branches_eligible_existing_path`],
/// then each successive parent — until some eligible branch already has
/// the climbed path, and return the eligible branches at that depth.
/// Climbing bottoms out at the mount root, which every branch trivially
/// "has", so this only returns empty when no branch is eligible at all.
pub(crate) fn branches_eligible_path_preserving(branches: &Branches, relpath: &Path) -> Vec<Arc<Branch>> {
 let mut current = relpath.to_path_buf();
 loop {
 let found: Vec<Arc<Branch>> =
 branches.iter().filter(|b| b.eligible_for_create() && b.contains(&current)).cloned().collect();
 if !found.is_empty() || current.as_os_str().is_empty() {
 return found;
 }
 current = current.parent().map(Path::to_path_buf).unwrap_or_default();
 }
}

/// The error to report when a Search policy's candidate set is empty: no
/// branch at all has the path.
pub(crate) fn empty_search_error() -> ErrorKind {
 ErrorKind::NotFound
}

/// The error to report when an Action policy's candidate set is empty.
/// Distinguishes "nobody has this path" from "somebody has it but every
/// copy is read-only".
pub(crate) fn empty_action_error(branches: &Branches, relpath: &Path) -> ErrorKind {
 if branches_containing(branches, relpath).is_empty() {
 ErrorKind::NotFound
 } else {
 ErrorKind::ReadOnlyFs
 }
}

/// The error to report when a Create policy's candidate set is empty even
/// after the free-space fallback tier: distinguishes "nothing writable at
/// all" from "writable branches exist but none have space".
pub(crate) fn empty_create_error(branches: &Branches) -> ErrorKind {
 if branches_eligible_for_create_ignoring_space(branches).is_empty() {
 ErrorKind::ReadOnlyFs
 } else {
 ErrorKind::NoSpace
 }
}

/// Resolves a policy by category and control-file name (see
/// `user.mergerfs.category.{search,action,create}` keys).
/// Each category has its own namespace: the same name can mean different
/// things (e.g. `"ff"` under `category.create` picks a branch to create on;
/// under `category.search` it picks a branch to read from). Returns `None`
/// for a name the category doesn't support, which the control file maps to
/// [`ErrorKind::NotAttr`].
pub fn by_name(category: Category, name: &str) -> Option<Arc<dyn Policy>> {
 match category {
 Category::Search => search::by_name(name),
 Category::Action => action::by_name(name),
 Category::Create => create::by_name(name),
 }
}
