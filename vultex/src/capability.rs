//! Capability negotiation between what the host offers and what the
//! application asks for.
//!
//! A [`CapabilityRegistry`] maps every capability name the host reports
//! (instance extensions, validation layers) to a signed demand counter
//! starting at `1`. A [`RequirementCheck`] then decrements the counter once
//! per requested name. After the check:
//!
//! | counter | meaning                                        |
//! |---------|------------------------------------------------|
//! | `0`     | requested once and available                   |
//! | `>= 1`  | available but never requested                  |
//! | `<= -1` | not available, or requested more than offered  |

use std::collections::BTreeMap;
use std::fmt;

/// Signed demand counters keyed by capability name, ordered by name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapabilityRegistry {
    counters: BTreeMap<String, i32>,
}

impl CapabilityRegistry {
    /// Seed a registry from the names the host reports as available.
    ///
    /// Duplicate names collapse into a single entry at `1`.
    pub fn from_available<I, S>(available: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let counters = available
            .into_iter()
            .map(|name| (name.into(), 1))
            .collect();
        Self { counters }
    }

    pub fn counter(&self, name: &str) -> Option<i32> {
        self.counters.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.counters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, i32)> {
        self.counters.iter().map(|(name, count)| (name.as_str(), *count))
    }

    /// Decrement `name`, inserting it at `0` first if the host never
    /// reported it. Returns the new counter.
    fn demand(&mut self, name: &str) -> i32 {
        let counter = self.counters.entry(name.to_owned()).or_insert(0);
        *counter -= 1;
        *counter
    }
}

/// Which kind of capability a check was run against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapabilityKind {
    Extensions,
    Layers,
}

impl fmt::Display for CapabilityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CapabilityKind::Extensions => f.write_str("Extensions"),
            CapabilityKind::Layers => f.write_str("Layers"),
        }
    }
}

/// Classification of a single registry entry after a check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapabilityStatus {
    /// Requested exactly as often as it is available.
    Satisfied,
    /// Available, never requested.
    Unrequested,
    /// Requested but absent, or requested more often than available.
    Missing,
}

impl CapabilityStatus {
    pub fn from_counter(counter: i32) -> Self {
        match counter {
            0 => CapabilityStatus::Satisfied,
            c if c > 0 => CapabilityStatus::Unrequested,
            _ => CapabilityStatus::Missing,
        }
    }

    pub fn icon(self) -> &'static str {
        match self {
            CapabilityStatus::Satisfied => "[x]",
            CapabilityStatus::Unrequested => "[ ]",
            CapabilityStatus::Missing => " ! ",
        }
    }
}

/// The result of checking a list of requested names against a registry.
#[derive(Debug, Clone)]
pub struct RequirementCheck {
    kind: CapabilityKind,
    registry: CapabilityRegistry,
    all_supported: bool,
}

impl RequirementCheck {
    /// Consume `registry` and demand every name in `requested` once per
    /// occurrence.
    ///
    /// The verdict flips to unsupported whenever a counter lands on exactly
    /// `-1`. Counters keep going down past that on repeated requests.
    pub fn new<I, S>(
        kind: CapabilityKind,
        mut registry: CapabilityRegistry,
        requested: I,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut all_supported = true;
        for name in requested {
            if registry.demand(name.as_ref()) == -1 {
                all_supported = false;
            }
        }

        Self {
            kind,
            registry,
            all_supported,
        }
    }

    pub fn kind(&self) -> CapabilityKind {
        self.kind
    }

    pub fn all_supported(&self) -> bool {
        self.all_supported
    }

    pub fn registry(&self) -> &CapabilityRegistry {
        &self.registry
    }

    /// Names whose demand could not be met, ordered by name.
    pub fn missing(&self) -> Vec<String> {
        self.registry
            .iter()
            .filter(|(_, counter)| *counter < 0)
            .map(|(name, _)| name.to_owned())
            .collect()
    }

    pub fn report(&self) -> RequirementReport {
        RequirementReport {
            kind: self.kind,
            entries: self
                .registry
                .iter()
                .map(|(name, counter)| {
                    (name.to_owned(), CapabilityStatus::from_counter(counter))
                })
                .collect(),
            all_supported: self.all_supported,
        }
    }

    /// Write the status table to the tracing subscriber.
    pub fn log_statuses(&self) {
        tracing::info!("{} status:", self.kind);
        for (name, counter) in self.registry.iter() {
            tracing::info!(
                "\t {} {}",
                CapabilityStatus::from_counter(counter).icon(),
                name
            );
        }
        tracing::info!(
            "{} all supported: {}",
            self.kind,
            self.all_supported
        );
    }
}

/// Read-only snapshot of a [`RequirementCheck`], one entry per known
/// capability in name order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequirementReport {
    pub kind: CapabilityKind,
    pub entries: Vec<(String, CapabilityStatus)>,
    pub all_supported: bool,
}

impl fmt::Display for RequirementReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} status:", self.kind)?;
        for (name, status) in &self.entries {
            writeln!(f, "\t {} {}", status.icon(), name)?;
        }
        write!(f, "{} all supported: {}", self.kind, self.all_supported)
    }
}
