// Backing collection naming
//
// The naming scheme is shared with peer processes using the same store, so
// both directions must stay bit-exact: collection = prefix + id + ".jobs",
// and id recovery strips the prefix then the suffix.

/// Suffix appended to every backing collection name.
pub const JOBS_SUFFIX: &str = ".jobs";

/// Derive the backing collection name for a logical queue id.
pub fn collection_from_id(prefix: &str, id: &str) -> String {
    format!("{prefix}{id}{JOBS_SUFFIX}")
}

/// Recover the logical queue id from a discovered collection name.
pub fn id_from_collection(prefix: &str, collection: &str) -> String {
    let name = collection.strip_prefix(prefix).unwrap_or(collection);
    let name = name.strip_suffix(JOBS_SUFFIX).unwrap_or(name);
    name.to_string()
}
