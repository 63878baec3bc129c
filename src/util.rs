use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref SCHEME: Regex = Regex::new("^(?:s3a?|gs)://[^/]*/").unwrap();
}

/// Strips the bucket scheme and name from a fully qualified location so the
/// remainder can be used as an object store path.
pub(crate) fn strip_prefix(path: &str) -> String {
    SCHEME.replace(path, "").to_string()
}
