use crate::job::MaintainJob;
use std::collections::HashMap;
use std::fmt::{self, Debug};

pub type JobFactory = Box<dyn Fn() -> Box<dyn MaintainJob> + Send + Sync>;

/// Names accepted for backward compatibility, mapped to the job they now mean.
const LEGACY_ALIASES: &[(&str, &str)] = &[("delete_empty_autocreated_service", "delete_empty_service")];

/// Job catalog. Each start builds fresh job instances from the factories, so
/// a restarted runner never inherits state from a previous run.
#[derive(Default)]
pub struct JobRegistry {
    factories: HashMap<String, JobFactory>,
}

impl Debug for JobRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobRegistry")
            .field("jobs", &self.names())
            .finish()
    }
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `factory` under `name`, replacing any earlier registration.
    pub fn register<F>(&mut self, name: &str, factory: F)
    where
        F: Fn() -> Box<dyn MaintainJob> + Send + Sync + 'static,
    {
        self.factories.insert(name.to_string(), Box::new(factory));
    }

    /// Maps a configured name to its canonical job name.
    pub fn canonical_name(name: &str) -> &str {
        LEGACY_ALIASES
            .iter()
            .find(|(legacy, _)| *legacy == name)
            .map(|(_, canonical)| *canonical)
            .unwrap_or(name)
    }

    /// A new instance of the job configured as `name`, with its canonical name.
    pub fn create(&self, name: &str) -> Option<(String, Box<dyn MaintainJob>)> {
        let canonical = Self::canonical_name(name);
        self.factories
            .get(canonical)
            .map(|factory| (canonical.to_string(), factory()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(Self::canonical_name(name))
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.keys().cloned().collect();
        names.sort();
        names
    }
}
