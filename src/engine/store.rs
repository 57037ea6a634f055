use std::path::PathBuf;

use anyhow::Result;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use util::HashMap;
use workflow::{Graph, Variables};

use super::{Unit, UnitKind, UnitStatus};

/// Everything needed to pick a unit up again after a restart.
/// Links are stored by name, so a record survives a graph migration
/// as long as the link it points at still exists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    pub uuid: Uuid,
    pub path: PathBuf,
    pub kind: UnitKind,
    pub name: String,
    pub link: String,
    pub status: UnitStatus,
    pub vars: Variables,
    #[serde(default)]
    pub magic: Option<String>,
    pub graph_version: u64,
    /// set just before a task is dispatched, cleared once its result is recorded
    #[serde(default)]
    pub in_flight: bool,
    #[serde(default)]
    pub failure: Option<String>,
}

impl Progress {
    pub fn of(unit: &Unit, graph: &Graph) -> Self {
        Self {
            uuid: unit.uuid,
            path: unit.path.clone(),
            kind: unit.kind,
            name: unit.name.clone(),
            link: graph.name(unit.current).to_owned(),
            status: unit.status,
            vars: unit.vars.clone(),
            magic: unit.magic.map(|id| graph.name(id).to_owned()),
            graph_version: graph.version(),
            in_flight: false,
            failure: None,
        }
    }
}

/// Durable record of where each unit is.
pub trait ProgressStore: Send + Sync {
    fn save_progress(&self, progress: &Progress) -> Result<()>;
    fn load_progress(&self, uuid: Uuid) -> Result<Option<Progress>>;
    /// All known units, in a stable order.
    fn list(&self) -> Result<Vec<Progress>>;
}

/// Store that lives only as long as the process. Used by tests
/// and for runs that don't need to survive a restart.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: Mutex<HashMap<Uuid, Progress>>,
    history: Mutex<Vec<Progress>>,
}

impl MemoryStore {
    /// Every record ever saved, oldest first.
    pub fn history(&self) -> Vec<Progress> {
        self.history.lock().clone()
    }
}

impl ProgressStore for MemoryStore {
    fn save_progress(&self, progress: &Progress) -> Result<()> {
        self.records.lock().insert(progress.uuid, progress.clone());
        self.history.lock().push(progress.clone());
        Ok(())
    }

    fn load_progress(&self, uuid: Uuid) -> Result<Option<Progress>> {
        Ok(self.records.lock().get(&uuid).cloned())
    }

    fn list(&self) -> Result<Vec<Progress>> {
        let mut all: Vec<_> = self.records.lock().values().cloned().collect();
        all.sort_by(|a, b| a.uuid.cmp(&b.uuid));
        Ok(all)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::path::Path;

    #[test]
    fn test_progress_json() -> Result<()> {
        let items = syntax::parse("start sip -> @a\nlink a { goto-magic }")?;
        let (graph, _) = Graph::load(items)?;
        let start = graph.require("a")?;
        let mut unit = Unit::new(Uuid::new_v4(), Path::new("/u/one"), UnitKind::Sip, start, None)?;
        unit.magic = Some(start);
        let progress = Progress::of(&unit, &graph);
        assert_eq!("a", progress.link);
        assert_eq!(Some("a"), progress.magic.as_deref());

        let text = serde_json::to_string(&progress)?;
        assert!(text.contains(r#""status":"active""#));
        assert!(text.contains(r#""kind":"sip""#));
        let back: Progress = serde_json::from_str(&text)?;
        assert_eq!(progress, back);
        Ok(())
    }

    #[test]
    fn test_memory_store() -> Result<()> {
        let store = MemoryStore::default();
        let items = syntax::parse("start sip -> @a\nlink a { goto-magic }")?;
        let (graph, _) = Graph::load(items)?;
        let unit = Unit::new(Uuid::new_v4(), Path::new("/u/x"), UnitKind::Sip, graph.require("a")?, None)?;
        let mut progress = Progress::of(&unit, &graph);
        store.save_progress(&progress)?;
        progress.status = UnitStatus::Completed;
        store.save_progress(&progress)?;
        assert_eq!(Some(progress), store.load_progress(unit.uuid)?);
        assert_eq!(1, store.list()?.len());
        assert_eq!(2, store.history().len());
        assert_eq!(None, store.load_progress(Uuid::new_v4())?);
        Ok(())
    }
}
