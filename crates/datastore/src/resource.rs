//! # Resource Keys
//!
//! Identity of a single archived resource and the partition filters used to
//! select resources out of a descriptor.

use std::collections::BTreeMap;
use std::fmt;

/// Partition selectors, e.g. `{"year": "2020", "state": "CO"}`.
pub type PartitionFilters = BTreeMap<String, String>;

/// Identifies one resource within one release of a dataset.
///
/// Keys are compared structurally: two keys with equal fields name the same
/// bytes in every cache layer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceKey {
    /// Dataset name, e.g. `eia860`
    pub dataset: String,
    /// Release identifier (a DOI) of the archived dataset version
    pub release_id: String,
    /// Resource name as declared in the descriptor
    pub name: String,
}

impl ResourceKey {
    pub fn new(
        dataset: impl Into<String>,
        release_id: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            dataset: dataset.into(),
            release_id: release_id.into(),
            name: name.into(),
        }
    }

    /// Relative storage path shared by every persistent cache layer:
    /// `<dataset>/<release-id with '/' replaced by '-'>/<name>`.
    pub fn storage_path(&self) -> String {
        format!(
            "{}/{}/{}",
            self.dataset,
            self.release_id.replace('/', "-"),
            self.name
        )
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.dataset, self.release_id, self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_structural_equality() {
        let a = ResourceKey::new("eia860", "10.5281/zenodo.4127027", "eia860-2019.zip");
        let b = ResourceKey::new("eia860", "10.5281/zenodo.4127027", "eia860-2019.zip");
        let c = ResourceKey::new("eia860", "10.5281/zenodo.4127027", "eia860-2018.zip");

        assert_eq!(a, b);
        assert_ne!(a, c);

        let set: HashSet<_> = [a, b, c].into_iter().collect();
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_storage_path_flattens_release_id() {
        let key = ResourceKey::new("ferc1", "10.5281/zenodo.4127044", "ferc1-2019.zip");
        assert_eq!(
            key.storage_path(),
            "ferc1/10.5281-zenodo.4127044/ferc1-2019.zip"
        );
    }

    #[test]
    fn test_display() {
        let key = ResourceKey::new("ferc1", "10.5281/zenodo.4127044", "datapackage.json");
        assert_eq!(
            key.to_string(),
            "ferc1/10.5281/zenodo.4127044/datapackage.json"
        );
    }
}
