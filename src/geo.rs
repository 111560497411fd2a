//! Geographic lookup of game server addresses

use crate::types::Region;
use crate::utils::host_of;

/// Resolves a server address to the continent it is hosted on
pub trait RegionResolver: Send + Sync {
    /// `None` when the address cannot be placed
    fn region(&self, address: &str) -> Option<Region>;
}

/// Prefix table resolver, used for fixed deployments and tests
#[derive(Debug, Clone, Default)]
pub struct StaticRegionResolver {
    entries: Vec<(String, Region)>,
}

impl StaticRegionResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Map every host starting with `prefix` to the given continent
    pub fn with_entry(mut self, prefix: &str, code: &str, name: &str) -> Self {
        self.entries.push((
            prefix.to_string(),
            Region {
                code: code.to_string(),
                name: name.to_string(),
            },
        ));
        self
    }
}

impl RegionResolver for StaticRegionResolver {
    fn region(&self, address: &str) -> Option<Region> {
        let host = host_of(address);
        self.entries
            .iter()
            .filter(|(prefix, _)| host.starts_with(prefix.as_str()))
            .max_by_key(|(prefix, _)| prefix.len())
            .map(|(_, region)| region.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_longest_prefix_wins() {
        let resolver = StaticRegionResolver::new()
            .with_entry("10.", "EU", "Europe")
            .with_entry("10.1.", "NA", "North America");

        assert_eq!(resolver.region("10.1.2.3:27015").unwrap().code, "NA");
        assert_eq!(resolver.region("10.2.2.3:27015").unwrap().code, "EU");
        assert!(resolver.region("192.168.0.1:27015").is_none());
    }
}
