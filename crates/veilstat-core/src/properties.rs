//! Property catalog: declared definitions reconciled with observed keys.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::analytics::{PropertyDefinition, PropertyOperation};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    /// Configured for the site but never seen in stored events.
    Declared,
    /// Seen in stored events but not configured.
    Observed,
    Both,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub name: String,
    pub provenance: Provenance,
    /// `None` until the property is declared.
    pub operation: Option<PropertyOperation>,
}

/// Union of declared and observed property names, de-duplicated by name and
/// sorted by name. A name declared twice keeps its first definition.
pub fn reconcile_catalog(
    declared: &[PropertyDefinition],
    observed: &[String],
) -> Vec<CatalogEntry> {
    let mut entries: BTreeMap<&str, CatalogEntry> = BTreeMap::new();

    for def in declared {
        entries.entry(def.name.as_str()).or_insert_with(|| CatalogEntry {
            name: def.name.clone(),
            provenance: Provenance::Declared,
            operation: Some(def.operation),
        });
    }

    for key in observed {
        entries
            .entry(key.as_str())
            .and_modify(|entry| {
                if entry.provenance == Provenance::Declared {
                    entry.provenance = Provenance::Both;
                }
            })
            .or_insert_with(|| CatalogEntry {
                name: key.clone(),
                provenance: Provenance::Observed,
                operation: None,
            });
    }

    entries.into_values().collect()
}
