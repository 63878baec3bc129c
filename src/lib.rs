#![deny(missing_docs)]
/*!
# Floe

Floe is a library implementing the snapshot and manifest maintenance layer
of an Iceberg-style partitioned table format.

A table is a set of immutable data files described by immutable manifest
files; a snapshot is an ordered list of manifests. Floe produces new
snapshots by combining staged data files with the existing table state,
applying deletes expressed as file paths, partition tuples, or row
predicates, and compacting manifests towards a target size along the way.

The main entry points are [table::Table] and the
[transaction::Transaction] it hands out; the underlying update object,
[transaction::merge::MergingSnapshotProducer], can be driven directly when
commit transport is handled elsewhere.

Currently supported:
* Appending data files.
* Deleting by path, partition tuple, and row predicate with strict and
  inclusive partition projections.
* Manifest compaction with size-targeted bin packing.
* Optimistic commit retries with retry-safe output caching and orphan
  cleanup.
*/
pub mod catalog;
pub mod error;
pub mod expr;
pub mod model;
pub mod table;
pub mod transaction;
pub(crate) mod util;

pub use error::{Error, Result};

pub use object_store;
