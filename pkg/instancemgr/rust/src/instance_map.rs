// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! The set of instances known to the manager, keyed by name.
//!
//! Callers take the map lock, look up what they need and clone the `Arc`s
//! out before locking any instance. The map lock is always taken before an
//! instance lock, never the other way round.

use crate::instance::{Instance, InstanceError, is_mysqld_compatible_name, is_name_valid};
use crate::instance_options::InstanceDefaults;
use crate::option_file::{self, NamedOption, OptionFileError};
use crate::process::ProcessControl;
use crate::state::InstanceState;
use crate::thread_registry::ThreadRegistry;
use log::{debug, info, warn};
use parking_lot::{Mutex, MutexGuard};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// What the map needs to know to (re)build instances.
#[derive(Debug, Clone)]
pub struct MapSettings {
    pub defaults_file: PathBuf,
    pub defaults: InstanceDefaults,
    pub mysqld_safe_compatible: bool,
}

pub struct InstanceMap {
    settings: MapSettings,
    control: Arc<dyn ProcessControl>,
    registry: Arc<ThreadRegistry>,
    instances: Mutex<HashMap<String, Arc<Instance>>>,
}

impl InstanceMap {
    pub fn new(
        settings: MapSettings,
        control: Arc<dyn ProcessControl>,
        registry: Arc<ThreadRegistry>,
    ) -> Self {
        Self {
            settings,
            control,
            registry,
            instances: Mutex::new(HashMap::new()),
        }
    }

    pub fn lock(&self) -> InstanceMapGuard<'_> {
        InstanceMapGuard {
            map: self,
            instances: self.instances.lock(),
        }
    }

    pub fn defaults_file(&self) -> &Path {
        &self.settings.defaults_file
    }

    pub fn control(&self) -> &Arc<dyn ProcessControl> {
        &self.control
    }
}

pub struct InstanceMapGuard<'a> {
    map: &'a InstanceMap,
    instances: MutexGuard<'a, HashMap<String, Arc<Instance>>>,
}

impl InstanceMapGuard<'_> {
    pub fn find(&self, name: &str) -> Option<Arc<Instance>> {
        self.instances.get(name).cloned()
    }

    /// Snapshot of every instance, sorted by name.
    pub fn instances(&self) -> Vec<Arc<Instance>> {
        let mut all: Vec<_> = self.instances.values().cloned().collect();
        all.sort_by(|a, b| a.name().cmp(b.name()));
        all
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    pub fn defaults_file(&self) -> &Path {
        self.map.defaults_file()
    }

    pub fn is_there_active_instance(&self) -> bool {
        self.instances.values().any(|instance| instance.lock().is_active())
    }

    /// Builds a new instance without inserting it.
    pub fn create_instance(
        &self,
        name: &str,
        options: Vec<NamedOption>,
        initial_state: InstanceState,
    ) -> Result<Arc<Instance>, InstanceError> {
        if self.instances.contains_key(name) {
            return Err(InstanceError::AlreadyExists(name.to_string()));
        }
        Instance::new(
            name,
            options,
            initial_state,
            &self.map.settings.defaults,
            Arc::clone(&self.map.control),
            Arc::clone(&self.map.registry),
        )
    }

    pub fn insert(&mut self, instance: Arc<Instance>) -> Result<(), InstanceError> {
        let name = instance.name().to_string();
        if self.instances.contains_key(&name) {
            return Err(InstanceError::AlreadyExists(name));
        }
        debug!("[{name}] added to the instance map");
        self.instances.insert(name, instance);
        Ok(())
    }

    pub fn remove_instance(&mut self, name: &str) -> Option<Arc<Instance>> {
        let removed = self.instances.remove(name);
        if removed.is_some() {
            debug!("[{name}] removed from the instance map");
        }
        removed
    }

    /// Drops every instance and reloads the option file. The caller checks
    /// that nothing is active first.
    pub fn reset(&mut self) -> Result<(), OptionFileError> {
        self.instances.clear();
        self.load()
    }

    /// Reads every instance section of the option file. Sections with the
    /// same name are merged, later options winning. Sections that cannot
    /// become an instance are skipped with a warning. A missing option file
    /// yields an empty map.
    pub fn load(&mut self) -> Result<(), OptionFileError> {
        let path = self.map.settings.defaults_file.clone();
        let sections = match option_file::read_sections(&path) {
            Ok(sections) => sections,
            Err(OptionFileError::NotFound(p)) => {
                warn!("option file {} does not exist, no instances loaded", p.display());
                Vec::new()
            }
            Err(e) => return Err(e),
        };

        let mut merged: Vec<(String, Vec<NamedOption>)> = Vec::new();
        for section in sections.into_iter().filter(|s| is_name_valid(&s.name)) {
            match merged.iter_mut().find(|(name, _)| *name == section.name) {
                Some((_, options)) => options.extend(section.options),
                None => merged.push((section.name, section.options)),
            }
        }

        for (name, options) in merged {
            if self.instances.contains_key(&name) {
                continue;
            }
            match self.create_instance(&name, options, InstanceState::NotStarted) {
                Ok(instance) => {
                    self.instances.insert(name, instance);
                }
                Err(e) => warn!("[{name}] skipped: {e}"),
            }
        }

        if self.map.settings.mysqld_safe_compatible {
            self.add_mysqld_compatible_instance(&path);
        }
        info!(
            "loaded {} instance(s) from {}",
            self.instances.len(),
            path.display()
        );
        Ok(())
    }

    fn add_mysqld_compatible_instance(&mut self, path: &Path) {
        if self.instances.keys().any(|name| is_mysqld_compatible_name(name)) {
            return;
        }
        let name = "mysqld";
        match self.create_instance(name, Vec::new(), InstanceState::NotStarted) {
            Ok(instance) => {
                if let Err(e) = option_file::add_section(path, name, &[]) {
                    warn!("[{name}] cannot save the section to {}: {e}", path.display());
                }
                info!("[{name}] created for mysqld_safe compatibility");
                self.instances.insert(name.to_string(), instance);
            }
            Err(e) => warn!("[{name}] cannot be created: {e}"),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::test_utils::TestEnv;
    use proptest::prelude::*;

    const CONFIG: &str = "\
[client]
user=root

[mysqld1]
port=3307
nonguarded

[mysqld2]
port=3308

[mysqlx]
port=1

[mysqld1]
port=3309
";

    fn names(map: &InstanceMap) -> Vec<String> {
        map.lock()
            .instances()
            .iter()
            .map(|i| i.name().to_string())
            .collect()
    }

    #[test]
    fn test_load_instance_sections_only() {
        let env = TestEnv::new();
        let map = env.loaded_map(CONFIG);
        assert_eq!(names(&map), vec!["mysqld1", "mysqld2"]);

        let guard = map.lock();
        let mysqld1 = guard.find("mysqld1").unwrap();
        let instance = mysqld1.lock();
        assert_eq!(instance.state(), InstanceState::NotStarted);
        // duplicate sections merge, the later value wins
        assert_eq!(instance.options().value("port"), Some("3309"));
        assert!(!instance.is_guarded());
    }

    #[test]
    fn test_load_skips_incompatible_instance() {
        let env = TestEnv::new();
        let map = env.loaded_map("[mysqld]\nnonguarded\n[mysqld3]\n");
        assert_eq!(names(&map), vec!["mysqld3"]);
    }

    #[test]
    fn test_load_missing_file_is_empty() {
        let env = TestEnv::new();
        let map = InstanceMap::new(
            env.settings(false),
            env.control.clone(),
            Arc::clone(&env.registry),
        );
        map.lock().load().unwrap();
        assert!(map.lock().is_empty());
    }

    #[test]
    fn test_mysqld_safe_compatible_synthesizes_instance() {
        let env = TestEnv::new();
        env.write_config("[mysqld1]\n");
        let map = InstanceMap::new(
            env.settings(true),
            env.control.clone(),
            Arc::clone(&env.registry),
        );
        map.lock().load().unwrap();
        assert_eq!(names(&map), vec!["mysqld", "mysqld1"]);

        let sections = option_file::read_sections(&env.config_path()).unwrap();
        assert!(sections.iter().any(|s| s.name == "mysqld"));

        // reloading does not add a second one
        map.lock().reset().unwrap();
        assert_eq!(names(&map), vec!["mysqld", "mysqld1"]);
    }

    #[test]
    fn test_insert_rejects_duplicate() {
        let env = TestEnv::new();
        let map = env.loaded_map("[mysqld1]\n");
        let mut guard = map.lock();
        assert!(matches!(
            guard.create_instance("mysqld1", vec![], InstanceState::Stopped),
            Err(InstanceError::AlreadyExists(_))
        ));
        let other = env.instance("mysqld1", vec![], InstanceState::Stopped).unwrap();
        assert!(matches!(guard.insert(other), Err(InstanceError::AlreadyExists(_))));
        assert_eq!(guard.len(), 1);
    }

    #[test]
    fn test_remove_and_active_check() {
        let env = TestEnv::new();
        let map = env.loaded_map("[mysqld1]\n[mysqld2]\n");
        let mut guard = map.lock();
        // loaded guarded instances are NOT_STARTED, hence active
        assert!(guard.is_there_active_instance());
        for instance in guard.instances() {
            instance.lock().set_state(InstanceState::Stopped);
        }
        assert!(!guard.is_there_active_instance());
        assert!(guard.remove_instance("mysqld1").is_some());
        assert!(guard.remove_instance("mysqld1").is_none());
        assert!(guard.find("mysqld1").is_none());
        assert!(guard.find("mysqld2").is_some());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        // whatever sequence of creates and drops, names stay unique and the
        // map agrees with a plain set model
        #[test]
        fn prop_names_stay_unique(ops in proptest::collection::vec((any::<bool>(), 0u8..4), 1..30)) {
            let env = TestEnv::new();
            let map = env.loaded_map("");
            let mut model = std::collections::BTreeSet::new();
            for (create, n) in ops {
                let name = format!("mysqld{n}");
                let mut guard = map.lock();
                if create {
                    let created = guard
                        .create_instance(&name, vec![], InstanceState::Stopped)
                        .and_then(|i| guard.insert(i));
                    prop_assert_eq!(created.is_ok(), model.insert(name.clone()));
                } else {
                    prop_assert_eq!(guard.remove_instance(&name).is_some(), model.remove(&name));
                }
            }
            let got: Vec<String> = names(&map);
            let want: Vec<String> = model.into_iter().collect();
            prop_assert_eq!(got, want);
        }
    }
}
