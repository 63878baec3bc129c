/*!
Types that model the table format: schemas, partition specs, values,
manifests, snapshots, and table metadata.
*/

pub mod manifest;
pub mod manifest_list;
pub mod metadata;
pub mod partition;
pub mod schema;
pub mod snapshot;
pub mod values;
