//! Probe to gene mapping used to group probe-level results by gene

use std::collections::BTreeMap;

/// Lookup of the genes a probe maps to. A probe may map to none, one or many genes.
pub trait ProbeGeneMapper {
    fn genes_for(&self, probe: &str) -> &[String];
}

/// In-memory probe to gene map
#[derive(Debug, Clone, Default)]
pub struct ProbeGeneMap {
    genes: BTreeMap<String, Vec<String>>,
}

impl ProbeGeneMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from (probe, gene) pairs
    pub fn from_pairs<I, P, G>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (P, G)>,
        P: Into<String>,
        G: Into<String>,
    {
        let mut map = Self::new();
        for (probe, gene) in pairs {
            map.insert(probe, gene);
        }
        map
    }

    /// Add a mapping; duplicates are ignored
    pub fn insert(&mut self, probe: impl Into<String>, gene: impl Into<String>) {
        let gene = gene.into();
        let genes = self.genes.entry(probe.into()).or_default();
        if !genes.contains(&gene) {
            genes.push(gene);
        }
    }

    pub fn n_probes(&self) -> usize {
        self.genes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.genes.is_empty()
    }
}

impl ProbeGeneMapper for ProbeGeneMap {
    fn genes_for(&self, probe: &str) -> &[String] {
        self.genes.get(probe).map_or(&[], Vec::as_slice)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_lookup() {
        let map = ProbeGeneMap::from_pairs(vec![
            ("p1", "GUK1"),
            ("p2", "ACTB"),
            ("p2", "ACTG1"),
            ("p1", "GUK1"),
        ]);

        assert_eq!(map.n_probes(), 2);
        assert_eq!(map.genes_for("p1"), &["GUK1".to_string()]);
        assert_eq!(map.genes_for("p2").len(), 2);
        assert!(map.genes_for("p3").is_empty());
    }
}
