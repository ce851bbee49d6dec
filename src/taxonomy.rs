//! Fixed 1000 Genomes population taxonomy.

use std::{
    collections::{BTreeMap, BTreeSet},
    sync::LazyLock,
};

/// Label given to samples without a population assignment.
pub const DEFAULT_POPULATION: &str = "SET";

pub const EAS: &[&str] = &["CHB", "JPT", "CHS", "CDX", "KHV"];
pub const EUR: &[&str] = &["CEU", "TSI", "FIN", "GBR", "IBS"];
pub const AFR: &[&str] = &["YRI", "LWK", "GWD", "MSL", "ESN", "ASW", "ACB"];
pub const AMR: &[&str] = &["MXL", "PUR", "CLM", "PEL"];
pub const SAS: &[&str] = &["GIH", "PJL", "BEB", "STU", "ITU"];

pub const CONTINENTS: [(&str, &[&str]); 5] = [
    ("EAS", EAS),
    ("EUR", EUR),
    ("AFR", AFR),
    ("AMR", AMR),
    ("SAS", SAS),
];

static THOUSAND_GENOMES: LazyLock<Taxonomy> = LazyLock::new(Taxonomy::build);

/// Group label to the population codes it contains.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Taxonomy {
    groups: BTreeMap<String, BTreeSet<String>>,
}

impl Taxonomy {
    /// The process-wide taxonomy.
    pub fn global() -> &'static Taxonomy {
        &THOUSAND_GENOMES
    }

    fn build() -> Self {
        let mut groups = BTreeMap::new();

        for (label, codes) in CONTINENTS {
            let set: BTreeSet<String> = codes
                .iter()
                .flat_map(|code| [(*code).to_string(), format!("{label}-{code}")])
                .collect();
            groups.insert(label.to_string(), set);
        }

        let union_of = |labels: &[&str], groups: &BTreeMap<String, BTreeSet<String>>| {
            labels
                .iter()
                .filter_map(|label| groups.get(*label))
                .flatten()
                .cloned()
                .collect::<BTreeSet<String>>()
        };
        let all = union_of(&["EAS", "EUR", "AFR", "AMR", "SAS"], &groups);
        let afam = union_of(&["EUR", "AFR"], &groups);

        groups.insert(
            DEFAULT_POPULATION.to_string(),
            BTreeSet::from([DEFAULT_POPULATION.to_string()]),
        );
        groups.insert(String::from("ALL"), all);
        groups.insert(String::from("AFAM"), afam);

        Self { groups }
    }

    pub fn codes(&self, group: &str) -> Option<&BTreeSet<String>> {
        self.groups.get(group)
    }

    pub fn is_defined(&self, group: &str) -> bool {
        self.groups.contains_key(group)
    }

    /// `None` when the group is not part of the taxonomy.
    pub fn contains(&self, group: &str, population: &str) -> Option<bool> {
        self.codes(group).map(|codes| codes.contains(population))
    }
}
