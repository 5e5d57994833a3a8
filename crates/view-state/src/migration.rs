//! Schema-versioned migration of persisted envelopes.
//!
//! Each [`MigrationStep`] upgrades view states from one `major.minor`
//! version to the next. [`MigrationEngine::migrate`] walks the chain from
//! the envelope's recorded version to the current one, decompressing each
//! view, applying every step in order, and recompressing.
//!
//! Migration fails closed. When the chain has a gap, the recorded version is
//! malformed, or it is newer than this build, every view is dropped. When a
//! single view's payload is corrupt or a step rejects it, only that view is
//! dropped. Losing a view's state beats loading a guessed one.

use tracing::{info, warn};

use crate::codec::StateCodec;
use crate::envelope::{CURRENT_VERSION, Envelope, SchemaVersion, ViewState};
use crate::error::StateError;

/// Transform applied to one view's state.
pub type Transform = fn(view: &str, state: &mut ViewState) -> Result<(), String>;

/// One link in the migration chain.
#[derive(Clone)]
pub struct MigrationStep {
    pub from: SchemaVersion,
    pub to: SchemaVersion,
    /// Short description for logs.
    pub description: &'static str,
    pub transform: Transform,
}

impl std::fmt::Debug for MigrationStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MigrationStep")
            .field("from", &self.from.to_string())
            .field("to", &self.to.to_string())
            .field("description", &self.description)
            .finish()
    }
}

/// Result of migrating an envelope.
#[derive(Debug, Clone)]
pub struct MigrationOutcome {
    /// The envelope at the target version.
    pub envelope: Envelope,
    /// Version the envelope was recorded at (raw string).
    pub from: String,
    pub to: SchemaVersion,
    /// Views whose state was discarded.
    pub dropped: Vec<String>,
}

impl MigrationOutcome {
    /// Whether any transform actually ran.
    pub fn changed(&self) -> bool {
        self.from != self.to.to_string()
    }
}

/// Ordered chain of version-to-version transforms.
#[derive(Debug, Clone)]
pub struct MigrationEngine {
    target: SchemaVersion,
    steps: Vec<MigrationStep>,
}

impl Default for MigrationEngine {
    fn default() -> Self {
        Self::new(CURRENT_VERSION)
            .with_step(MigrationStep {
                from: SchemaVersion::new(0, 9),
                to: SchemaVersion::new(1, 0),
                description: "rename selectedItems/scrollTop/query fields",
                transform: rename_legacy_fields,
            })
            .with_step(MigrationStep {
                from: SchemaVersion::new(1, 0),
                to: SchemaVersion::new(1, 1),
                description: "drop ephemeral lastRendered field",
                transform: drop_last_rendered,
            })
    }
}

impl MigrationEngine {
    /// Empty chain targeting `target`.
    pub fn new(target: SchemaVersion) -> Self {
        Self {
            target,
            steps: Vec::new(),
        }
    }

    pub fn with_step(mut self, step: MigrationStep) -> Self {
        self.steps.push(step);
        self
    }

    pub fn target(&self) -> SchemaVersion {
        self.target
    }

    /// Steps leading from `from` to the target, or `None` on a gap.
    pub fn path(&self, from: SchemaVersion) -> Option<Vec<&MigrationStep>> {
        let mut path = Vec::new();
        let mut at = from;
        while at != self.target {
            if at > self.target {
                return None;
            }
            let step = self.steps.iter().find(|s| s.from == at && s.to > at)?;
            path.push(step);
            at = step.to;
        }
        Some(path)
    }

    /// Upgrade `envelope` to the target version.
    pub fn migrate(&self, envelope: Envelope, codec: &StateCodec) -> MigrationOutcome {
        let from = envelope.version.clone();
        let steps = match envelope.schema_version() {
            Some(version) => self.path(version).ok_or(StateError::MigrationUnavailable {
                from: from.clone(),
                to: self.target.to_string(),
            }),
            None => Err(StateError::MigrationUnavailable {
                from: from.clone(),
                to: self.target.to_string(),
            }),
        };

        let mut migrated = Envelope::new();
        migrated.version = self.target.to_string();
        let mut dropped = Vec::new();

        let steps = match steps {
            Ok(steps) => steps,
            Err(e) => {
                warn!(error = %e, views = envelope.states.len(), "dropping all persisted views");
                dropped.extend(envelope.states.into_keys());
                return MigrationOutcome {
                    envelope: migrated,
                    from,
                    to: self.target,
                    dropped,
                };
            }
        };

        if steps.is_empty() {
            return MigrationOutcome {
                envelope,
                from,
                to: self.target,
                dropped,
            };
        }

        for (view, entry) in envelope.states {
            let upgraded = codec.decompress(&entry).and_then(|mut state| {
                for step in &steps {
                    (step.transform)(&view, &mut state).map_err(|reason| {
                        StateError::MigrationUnavailable {
                            from: format!("{} ({reason})", step.from),
                            to: step.to.to_string(),
                        }
                    })?;
                }
                codec.compress(&state)
            });
            match upgraded {
                Ok(entry) => {
                    migrated.states.insert(view, entry);
                }
                Err(e) => {
                    warn!(view = %view, error = %e, "dropping view during migration");
                    dropped.push(view);
                }
            }
        }

        info!(
            from = %from,
            to = %self.target,
            steps = steps.len(),
            kept = migrated.states.len(),
            dropped = dropped.len(),
            "migrated persisted view states"
        );

        MigrationOutcome {
            envelope: migrated,
            from,
            to: self.target,
            dropped,
        }
    }
}

fn rename_field(state: &mut ViewState, old: &str, new: &str) {
    if let Some(value) = state.remove(old) {
        // An explicit new-style value wins over the legacy one.
        state.entry(new.to_string()).or_insert(value);
    }
}

/// 0.9 → 1.0 field renames.
fn rename_legacy_fields(_view: &str, state: &mut ViewState) -> Result<(), String> {
    rename_field(state, "selectedItems", "selectedFiles");
    rename_field(state, "scrollTop", "scrollPosition");
    rename_field(state, "query", "searchQuery");
    Ok(())
}

/// 1.0 → 1.1: render bookkeeping is no longer persisted.
fn drop_last_rendered(_view: &str, state: &mut ViewState) -> Result<(), String> {
    state.remove("lastRendered");
    Ok(())
}
