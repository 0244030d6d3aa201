//! Create-category policies: pick the branch (or branches) a brand-new
//! path is created on.
//!
//! Grounded on `original_source/src/category.hpp`'s `Create` function list
//! and the metric-policy naming convention (`mfs`/`lfs`/`lus`/`pfrd`), with
//! the `ep*` (existing path) and `msp*` (most shared path / path
//! preserving) eligibility variants layered on top.
//!
//! All metric policies share one selection pipeline: build the eligible
//! candidate set (falling back past the free-space floor if every writable
//! branch is merely low on space, per the fallback chain), then reduce it
//! by the policy's metric. `erofs` skips the pipeline entirely — it always
//! reports the mount as read-only, used to disable file creation outright
//! while still allowing reads and removes.

use std::path::Path;
use std::sync::Arc;

use rand::seq::IndexedRandom;
use rand::Rng;

use super::{
 branches_eligible_existing_path, branches_eligible_for_create,
 branches_eligible_for_create_ignoring_space, branches_eligible_path_preserving,
 empty_create_error, Category, Policy,
};
use crate::branch::Branch;
use crate::error::{ErrorKind, Result};
use crate::Branches;

pub(crate) fn by_name(name: &str) -> Option<Arc<dyn Policy>> {
 use Eligibility::*;
 use Metric::*;
 let policy = match name {
 "all" => return Some(Arc::new(CreateAll { eligibility: Default })),
 "epall" => return Some(Arc::new(CreateAll { eligibility: ExistingPath })),
 "erofs" => return Some(Arc::new(Erofs)),
 "ff" => (Default, FirstFound),
 "mfs" => (Default, MostFree),
 "lfs" => (Default, LeastFree),
 "lus" => (Default, LeastUsed),
 "newest" => (Default, Newest),
 "rand" => (Default, Random),
 "pfrd" => (Default, ProportionalRandom),
 "epff" => (ExistingPath, FirstFound),
 "epmfs" => (ExistingPath, MostFree),
 "eplfs" => (ExistingPath, LeastFree),
 "eplus" => (ExistingPath, LeastUsed),
 "eprand" => (ExistingPath, Random),
 "eppfrd" => (ExistingPath, ProportionalRandom),
 "msplfs" => (PathPreserving, LeastFree),
 "mspmfs" => (PathPreserving, MostFree),
 "msplus" => (PathPreserving, LeastUsed),
 "msppfrd" => (PathPreserving, ProportionalRandom),
 _ => return None,
 };
 let (eligibility, metric) = policy;
 Some(Arc::new(MetricPolicy { name, eligibility, metric }))
}

#[derive(Clone, Copy)]
enum Eligibility {
 /// Any writable, non-read-only branch above (or, on fallback, ignoring)
 /// the free-space floor.
 Default,
 /// As `Default`, further restricted to branches where the path itself
 /// already exists (used to keep an existing file's sibling copies, like
 /// `.part` temp files, colocated).
 ExistingPath,
 /// As `Default`, further restricted to branches where the path's
 /// *parent directory* already exists (keeps a tree's files on one
 /// branch once any part of the tree has been created there).
 PathPreserving,
}

#[derive(Clone, Copy)]
enum Metric {
 FirstFound,
 MostFree,
 LeastFree,
 LeastUsed,
 Newest,
 Random,
 ProportionalRandom,
}

/// Builds the eligible candidate set for `eligibility`, following the
/// fallback chain down to a less restrictive eligibility when a tier
/// comes up empty: `PathPreserving` falls back to `ExistingPath` at the
/// original (un-climbed) `relpath`, which in turn falls back to `Default`.
fn candidate_set(eligibility: Eligibility, branches: &Branches, relpath: &Path) -> Vec<Arc<Branch>> {
 match eligibility {
 Eligibility::Default => {
 let primary = branches_eligible_for_create(branches);
 if !primary.is_empty() {
 primary
 } else {
 branches_eligible_for_create_ignoring_space(branches)
 }
 }
 Eligibility::ExistingPath => {
 let primary = branches_eligible_existing_path(branches, relpath);
 if !primary.is_empty() {
 primary
 } else {
 candidate_set(Eligibility::Default, branches, relpath)
 }
 }
 Eligibility::PathPreserving => {
 let primary = branches_eligible_path_preserving(branches, relpath);
 if !primary.is_empty() {
 primary
 } else {
 candidate_set(Eligibility::ExistingPath, branches, relpath)
 }
 }
 }
}

fn reduce_by_metric(candidates: Vec<Arc<Branch>>, metric: Metric, relpath: &Path) -> Option<Arc<Branch>> {
 match metric {
 Metric::FirstFound => candidates.into_iter().next(),
 Metric::MostFree => candidates
 .into_iter()
 .max_by_key(|b| b.space_info().map(|s| s.available_bytes()).unwrap_or(0)),
 Metric::LeastFree => candidates
 .into_iter()
 .min_by_key(|b| b.space_info().map(|s| s.available_bytes()).unwrap_or(u64::MAX)),
 Metric::LeastUsed => candidates.into_iter().min_by_key(|b| used_bytes(b)),
 Metric::Newest => candidates
 .into_iter()
 .max_by_key(|b| b.mtime_of(relpath).or_else(|| b.mtime_of(Path::new("."))))
 ,
 Metric::Random => {
 let mut rng = rand::rng();
 candidates.choose(&mut rng).cloned()
 }
 Metric::ProportionalRandom => weighted_choice(&candidates),
 }
}

fn used_bytes(branch: &Branch) -> u64 {
 match branch.space_info() {
 Ok(info) => info.blocks.saturating_mul(info.frsize).saturating_sub(info.available_bytes()),
 Err(_) => u64::MAX,
 }
}

fn weighted_choice(candidates: &[Arc<Branch>]) -> Option<Arc<Branch>> {
 let weights: Vec<u64> = candidates
 .iter()
 .map(|b| b.space_info().map(|s| s.available_bytes()).unwrap_or(0))
 .collect();
 let total: u64 = weights.iter().sum();
 if total == 0 {
 return candidates.first().cloned();
 }
 let mut rng = rand::rng();
 let mut point = rng.random_range(0..total);
 for (branch, weight) in candidates.iter().zip(weights.iter()) {
 if point < *weight {
 return Some(branch.clone());
 }
 point -= weight;
 }
 candidates.last().cloned()
}

/// A single-branch metric policy, parameterized over eligibility filter and
/// reduction metric (covers `ff`/`mfs`/`lfs`/`lus`/`newest`/`rand`/`pfrd`
/// and their `ep*`/`msp*` variants).
struct MetricPolicy {
 name: &'static str,
 eligibility: Eligibility,
 metric: Metric,
}

impl Policy for MetricPolicy {
 fn name(&self) -> &'static str {
 self.name
 }

 fn category(&self) -> Category {
 Category::Create
 }

 fn select(&self, branches: &Branches, relpath: &Path) -> Result<Vec<Arc<Branch>>> {
 let candidates = candidate_set(self.eligibility, branches, relpath);
 reduce_by_metric(candidates, self.metric, relpath)
 .map(|b| vec![b])
 .ok_or_else(|| empty_create_error(branches))
 }
}

/// `all`/`epall`: create on every eligible branch at once (used for
/// directories, so a `mkdir` propagates the tree structure consistently).
struct CreateAll {
 eligibility: Eligibility,
}

impl Policy for CreateAll {
 fn name(&self) -> &'static str {
 match self.eligibility {
 Eligibility::ExistingPath => "epall",
 _ => "all",
 }
 }

 fn category(&self) -> Category {
 Category::Create
 }

 fn select(&self, branches: &Branches, relpath: &Path) -> Result<Vec<Arc<Branch>>> {
 let candidates = candidate_set(self.eligibility, branches, relpath);
 if candidates.is_empty() {
 Err(empty_create_error(branches))
 } else {
 Ok(candidates)
 }
 }
}

/// `erofs`: always reports the mount as read-only. Installing this as the
/// create policy is the supported way to make a union read-only for new
/// files while still serving reads/removes against existing ones.
struct Erofs;

impl Policy for Erofs {
 fn name(&self) -> &'static str {
 "erofs"
 }

 fn category(&self) -> Category {
 Category::Create
 }

 fn select(&self, _branches: &Branches, _relpath: &Path) -> Result<Vec<Arc<Branch>>> {
 Err(ErrorKind::ReadOnlyFs)
 }
}

#[cfg(test)]
mod tests {
 use super::*;
 use crate::branch::BranchMode;
 use std::fs;
 use tempfile::tempdir;

 #[test]
 fn ff_picks_first_writable_branch() {
 let a = tempdir().unwrap();
 let b = tempdir().unwrap();
 let branches = Branches::flat(vec![
 crate::branch::Branch::new(a.path(), BranchMode::Rw, 0),
 crate::branch::Branch::new(b.path(), BranchMode::Rw, 0),
 ]);
 let picked = by_name("ff").unwrap().select(&branches, Path::new("new")).unwrap();
 assert_eq!(picked[0].path(), a.path());
 }

 #[test]
 fn erofs_always_readonly() {
 let a = tempdir().unwrap();
 let branches = Branches::flat(vec![crate::branch::Branch::new(a.path(), BranchMode::Rw, 0)]);
 assert_eq!(
 by_name("erofs").unwrap().select(&branches, Path::new("new")).unwrap_err(),
 ErrorKind::ReadOnlyFs
 );
 }

 #[test]
 fn ro_only_branches_report_readonly_not_nospace() {
 let a = tempdir().unwrap();
 let branches = Branches::flat(vec![crate::branch::Branch::new(a.path(), BranchMode::Ro, 0)]);
 assert_eq!(
 by_name("ff").unwrap().select(&branches, Path::new("new")).unwrap_err(),
 ErrorKind::ReadOnlyFs
 );
 }

 #[test]
 fn existing_path_variant_requires_path_present() {
 let a = tempdir().unwrap();
 let b = tempdir().unwrap();
 fs::write(a.path().join("x"), b"hi").unwrap();
 let branches = Branches::flat(vec![
 crate::branch::Branch::new(a.path(), BranchMode::Rw, 0),
 crate::branch::Branch::new(b.path(), BranchMode::Rw, 0),
 ]);
 let picked = by_name("epff").unwrap().select(&branches, Path::new("x")).unwrap();
 assert_eq!(picked.len(), 1);
 assert_eq!(picked[0].path(), a.path());
 }

 #[test]
 fn path_preserving_variant_requires_parent_present() {
 let a = tempdir().unwrap();
 let b = tempdir().unwrap();
 fs::create_dir(a.path().join("sub")).unwrap();
 let branches = Branches::flat(vec![
 crate::branch::Branch::new(a.path(), BranchMode::Rw, 0),
 crate::branch::Branch::new(b.path(), BranchMode::Rw, 0),
 ]);
 let picked = by_name("msplfs").unwrap().select(&branches, Path::new("sub/new")).unwrap();
 assert_eq!(picked[0].path(), a.path());
 }

 #[test]
 fn existing_path_variant_falls_back_to_default_when_path_is_new() {
 let a = tempdir().unwrap();
 let b = tempdir().unwrap();
 let branches = Branches::flat(vec![
 crate::branch::Branch::new(a.path(), BranchMode::Rw, 0),
 crate::branch::Branch::new(b.path(), BranchMode::Rw, 0),
 ]);
 // Neither branch has "new" yet, so `epff` falls back to plain `ff`
 // rather than reporting no eligible branches.
 let picked = by_name("epff").unwrap().select(&branches, Path::new("new")).unwrap();
 assert_eq!(picked[0].path(), a.path());
 }

 #[test]
 fn path_preserving_variant_falls_back_to_existing_path_at_mount_root() {
 let a = tempdir().unwrap();
 let b = tempdir().unwrap();
 let branches = Branches::flat(vec![
 crate::branch::Branch::new(a.path(), BranchMode::Rw, 0),
 crate::branch::Branch::new(b.path(), BranchMode::Rw, 0),
 ]);
 // No branch has "sub" at all, so the climb reaches the mount root,
 // where every eligible branch "has" the path — same candidate set as
 // `ff` itself.
 let picked = by_name("msplfs").unwrap().select(&branches, Path::new("sub/new")).unwrap();
 assert_eq!(picked.len(), 1);
 }

 #[test]
 fn create_all_covers_every_eligible_branch() {
 let a = tempdir().unwrap();
 let b = tempdir().unwrap();
 let branches = Branches::flat(vec![
 crate::branch::Branch::new(a.path(), BranchMode::Rw, 0),
 crate::branch::Branch::new(b.path(), BranchMode::Rw, 0),
 ]);
 let picked = by_name("all").unwrap().select(&branches, Path::new("newdir")).unwrap();
 assert_eq!(picked.len(), 2);
 }
}
