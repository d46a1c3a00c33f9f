//! Correlation of a desired set against dumped dataplane state.
//!
//! A desired item is satisfied only by an actual item equal to it on every
//! field after normalization. Matching identity with drifted attributes is
//! reconfigured. Without dump support every desired item is configured.
//!
//! The registry of the kind is superseded only once the dump succeeded. A
//! desired item that fails to apply keeps its previous entry, since the
//! dataplane still holds the old object.

use std::collections::{HashMap, HashSet};

use data_model::Resource;
use tracing::{debug, warn};

use crate::{
    driver::ResourceDriver,
    registry::{IndexEntry, NameIndex},
    Outcome,
};

/// Result of correlating one kind.
pub struct Correlation<R> {
    /// One outcome per desired item, in desired order.
    pub outcomes: Vec<Result<Outcome, anyhow::Error>>,
    /// Dumped entries whose identity no desired item claims.
    pub unclaimed: Vec<R>,
    /// Previously registered entries no desired item took over, in
    /// registration order. They are no longer in the registry.
    pub leftover: Vec<IndexEntry<R>>,
}

impl<R> Correlation<R> {
    pub fn last_error(&self) -> Option<&anyhow::Error> {
        self.outcomes.iter().rev().find_map(|o| o.as_ref().err())
    }
}

/// Position of the first actual entry equal to `desired` on every field.
pub fn find_match<R: PartialEq>(desired: &R, actual: &[R]) -> Option<usize> {
    actual.iter().position(|a| a == desired)
}

pub struct Correlator<'a, R: Resource> {
    index: &'a NameIndex<R>,
    driver: &'a dyn ResourceDriver<R>,
}

impl<'a, R: Resource> Correlator<'a, R> {
    pub fn new(index: &'a NameIndex<R>, driver: &'a dyn ResourceDriver<R>) -> Self {
        Self { index, driver }
    }

    pub async fn correlate(&self, desired: Vec<R>) -> Correlation<R> {
        let desired: Vec<R> = desired.into_iter().map(Resource::normalized).collect();

        let actual = if self.driver.supports_dump() {
            match self.driver.dump().await {
                Ok(actual) => Some(
                    actual
                        .into_iter()
                        .map(Resource::normalized)
                        .collect::<Vec<R>>(),
                ),
                Err(err) => {
                    warn!(kind = %R::KIND, error = %err, "dump failed, skipping kind");
                    let message = format!("{err:#}");
                    return Correlation {
                        outcomes: desired
                            .iter()
                            .map(|_| Err(anyhow::anyhow!("dump failed: {message}")))
                            .collect(),
                        unclaimed: Vec::new(),
                        leftover: Vec::new(),
                    };
                }
            }
        } else {
            None
        };

        let mut previous: HashMap<String, IndexEntry<R>> = self
            .index
            .drain()
            .into_iter()
            .map(|entry| (entry.name.clone(), entry))
            .collect();
        let mut outcomes: Vec<Option<Result<Outcome, anyhow::Error>>> =
            desired.iter().map(|_| None).collect();
        let mut seen: HashSet<String> = HashSet::new();
        let mut candidates = Vec::new();

        for (pos, item) in desired.into_iter().enumerate() {
            let name = match item.identity() {
                Ok(name) => name,
                Err(err) => {
                    outcomes[pos] = Some(Err(err.into()));
                    continue;
                }
            };
            if !seen.insert(name.clone()) {
                debug!(kind = %R::KIND, name = %name, "duplicate identity in desired set");
                outcomes[pos] = Some(Ok(Outcome::InSync));
                continue;
            }
            if let Some(actual) = &actual {
                if find_match(&item, actual).is_some() {
                    previous.remove(&name);
                    self.index.register(&name, item);
                    outcomes[pos] = Some(Ok(Outcome::InSync));
                    continue;
                }
            }
            candidates.push((pos, name, item));
        }

        for (pos, name, item) in candidates {
            let outcome = match self.driver.configure(&item).await {
                Ok(()) => {
                    previous.remove(&name);
                    self.index.register(&name, item);
                    Ok(Outcome::Configured)
                }
                Err(err) => {
                    warn!(kind = %R::KIND, name = %name, error = %err, "configure failed");
                    if let Some(entry) = previous.remove(&name) {
                        self.index.restore(entry);
                    }
                    Err(err)
                }
            };
            outcomes[pos] = Some(outcome);
        }

        let unclaimed = actual
            .unwrap_or_default()
            .into_iter()
            .filter(|a| {
                a.identity()
                    .map(|name| !seen.contains(&name))
                    .unwrap_or(false)
            })
            .collect();

        let mut leftover: Vec<IndexEntry<R>> = previous.into_values().collect();
        leftover.sort_by_key(|entry| entry.seq_num);

        Correlation {
            outcomes: outcomes
                .into_iter()
                .map(|o| o.unwrap_or(Ok(Outcome::InSync)))
                .collect(),
            unclaimed,
            leftover,
        }
    }
}
