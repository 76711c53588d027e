//! Config Sync: pushes collaborator changes into the live world.
//!
//! Both entry points funnel into one `commit`: take the world lock, apply
//! the change, take the ordering lock, release the world, then tell
//! observers. Loading from the collaborator happens before the world lock
//! is taken.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, PoisonError};

use arena_common::{BodyConfig, BodyId, SettingsPatch, WorldSettings};
use arena_kernel::World;
use arena_persist::{ChangeKind, ChangeListener, ConfigSource};
use arena_stream::{ConfigUpdate, ServerMessage};

use crate::server::Shared;

enum Change {
    Bodies(Vec<BodyConfig>),
    Settings(SettingsPatch),
}

/// Handle for reconciling collaborator state into a running server.
#[derive(Clone)]
pub struct ConfigSync {
    shared: Arc<Shared>,
}

impl ConfigSync {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        Self { shared }
    }

    /// Make the world's bodies match `active`.
    ///
    /// Bodies not in `active` are removed first, then new ones are added in
    /// order until `max_pucks` is reached. Existing bodies pick up config
    /// edits. Always broadcasts the resulting config list.
    pub fn reconcile_bodies(&self, active: Vec<BodyConfig>) -> ConfigUpdate {
        self.commit(Change::Bodies(active))
    }

    /// Adopt `settings`. Only fields that differ are applied and broadcast.
    pub fn reconcile_settings(&self, settings: &WorldSettings) -> ConfigUpdate {
        self.commit(Change::Settings(settings.to_patch()))
    }

    /// Apply a partial settings change.
    pub fn reconcile_patch(&self, patch: SettingsPatch) -> ConfigUpdate {
        self.commit(Change::Settings(patch))
    }

    /// A store listener that reloads from `source` on every committed write.
    pub fn listener(&self, source: Arc<dyn ConfigSource>) -> SourceListener {
        SourceListener {
            sync: self.clone(),
            source,
            reload: Mutex::new(()),
        }
    }

    fn commit(&self, change: Change) -> ConfigUpdate {
        let mut world = self.shared.world();
        let update = match change {
            Change::Bodies(active) => ConfigUpdate {
                body_configs: Some(apply_bodies(&mut world, active)),
                settings: None,
            },
            Change::Settings(patch) => {
                let changed = world.update_settings(&patch);
                if !changed.is_empty() {
                    tracing::info!(?changed, "settings reconciled");
                }
                ConfigUpdate {
                    body_configs: None,
                    settings: (!changed.is_empty()).then_some(changed),
                }
            }
        };
        let _order = self.shared.order(world);
        if !update.is_empty() {
            self.shared
                .registry
                .broadcast(ServerMessage::ConfigUpdate(update.clone()));
        }
        update
    }
}

fn apply_bodies(world: &mut World, active: Vec<BodyConfig>) -> Vec<BodyConfig> {
    let mut wanted = BTreeSet::new();
    let active: Vec<BodyConfig> = active
        .into_iter()
        .filter(|c| wanted.insert(c.id.clone()))
        .collect();

    let stale: Vec<BodyId> = world
        .ids()
        .filter(|id| !wanted.contains(*id))
        .cloned()
        .collect();
    let removed = stale.iter().filter(|id| world.remove_body(id)).count();

    let (mut added, mut updated, mut skipped) = (0usize, 0usize, 0usize);
    for config in active {
        let id = config.id.clone();
        let result = if world.contains(&id) {
            world.update_body(config).map(|changed| updated += usize::from(changed))
        } else {
            world.add_body(config).map(|_| added += 1)
        };
        if let Err(err) = result {
            skipped += 1;
            tracing::warn!(%id, %err, "puck not simulated");
        }
    }

    tracing::info!(
        added,
        removed,
        updated,
        skipped,
        bodies = world.body_count(),
        "bodies reconciled"
    );
    world.configs()
}

/// Reloads from a [`ConfigSource`] when the store reports a committed write.
///
/// Reloads run one at a time, each reading the source afresh, so the last
/// one to commit carries the newest data.
pub struct SourceListener {
    sync: ConfigSync,
    source: Arc<dyn ConfigSource>,
    reload: Mutex<()>,
}

impl ChangeListener for SourceListener {
    fn on_change(&self, kind: ChangeKind) {
        let _reload = self.reload.lock().unwrap_or_else(PoisonError::into_inner);
        let result = match kind {
            ChangeKind::Bodies => self
                .source
                .load_active_body_configs()
                .map(|configs| self.sync.reconcile_bodies(configs)),
            ChangeKind::Settings => self
                .source
                .load_settings()
                .map(|settings| self.sync.reconcile_settings(&settings)),
        };
        if let Err(err) = result {
            tracing::error!(?kind, %err, "reload from config source failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ArenaServer, ServerConfig};
    use arena_kernel::PhysicsTuning;
    use arena_persist::{PuckRecord, RecordStore, StoreData};

    fn server() -> ArenaServer {
        ArenaServer::new(
            ServerConfig {
                seed: Some(5),
                tuning: PhysicsTuning {
                    spawn_speed: 0.0,
                    ..PhysicsTuning::default()
                },
                ..ServerConfig::default()
            },
            WorldSettings::default(),
        )
        .unwrap()
    }

    fn ids(update: &ConfigUpdate) -> Vec<String> {
        update
            .body_configs
            .as_ref()
            .unwrap()
            .iter()
            .map(|c| c.id.to_string())
            .collect()
    }

    #[test]
    fn reconcile_removes_then_adds() {
        let s = server();
        let sync = s.config_sync();
        sync.reconcile_bodies(vec![BodyConfig::new("a"), BodyConfig::new("b")]);
        let update = sync.reconcile_bodies(vec![BodyConfig::new("b"), BodyConfig::new("c")]);
        assert_eq!(ids(&update), vec!["b", "c"]);
    }

    #[test]
    fn reconcile_is_idempotent_and_ignores_duplicates() {
        let s = server();
        let sync = s.config_sync();
        let list = vec![BodyConfig::new("a"), BodyConfig::new("a"), BodyConfig::new("b")];
        sync.reconcile_bodies(list.clone());
        let before = s.with_world(|w| w.all_states());
        let update = sync.reconcile_bodies(list);
        assert_eq!(ids(&update), vec!["a", "b"]);
        assert_eq!(s.with_world(|w| w.all_states()), before);
    }

    #[test]
    fn capacity_caps_additions_only() {
        let s = server();
        let sync = s.config_sync();
        sync.reconcile_patch(SettingsPatch {
            max_pucks: Some(2),
            ..SettingsPatch::default()
        });
        let update = sync.reconcile_bodies(
            ["a", "b", "c"].into_iter().map(BodyConfig::new).collect(),
        );
        assert_eq!(ids(&update), vec!["a", "b"]);

        // Removing one frees a slot for the next in line.
        let update = sync.reconcile_bodies(vec![BodyConfig::new("b"), BodyConfig::new("c")]);
        assert_eq!(ids(&update), vec!["b", "c"]);
    }

    #[test]
    fn invalid_config_is_skipped() {
        let s = server();
        let update = s.config_sync().reconcile_bodies(vec![
            BodyConfig::new("ok"),
            BodyConfig::new("flat").with_diameter(0.0),
        ]);
        assert_eq!(ids(&update), vec!["ok"]);
    }

    #[test]
    fn config_edits_reach_existing_bodies() {
        let s = server();
        let sync = s.config_sync();
        sync.reconcile_bodies(vec![BodyConfig::new("a")]);
        let mut edited = BodyConfig::new("a");
        edited.label = Some("Acme".into());
        let update = sync.reconcile_bodies(vec![edited]);
        assert_eq!(
            update.body_configs.unwrap()[0].label.as_deref(),
            Some("Acme")
        );
    }

    #[test]
    fn concurrent_store_writes_settle_on_latest_data() {
        let store = Arc::new(RecordStore::in_memory(StoreData::with_default_settings()));
        let s = server();
        store.subscribe(Arc::new(s.config_sync().listener(store.clone())));

        std::thread::scope(|scope| {
            for t in 0..4 {
                let store = &store;
                scope.spawn(move || {
                    for i in 0..10 {
                        store
                            .add_puck(PuckRecord {
                                id: format!("t{t}-{i}"),
                                ..PuckRecord::new()
                            })
                            .unwrap();
                    }
                });
            }
        });

        let mut expected: Vec<String> = store
            .load_active_body_configs()
            .unwrap()
            .iter()
            .map(|c| c.id.to_string())
            .collect();
        expected.sort();
        assert_eq!(expected.len(), 40);
        let simulated: Vec<String> = s.with_world(|w| w.ids().map(ToString::to_string).collect());
        assert_eq!(simulated, expected);
    }

    #[test]
    fn unchanged_patch_is_empty() {
        let s = server();
        let update = s.config_sync().reconcile_patch(SettingsPatch {
            friction: Some(WorldSettings::default().friction),
            ..SettingsPatch::default()
        });
        assert!(update.is_empty());
    }
}
