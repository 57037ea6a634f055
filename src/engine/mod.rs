use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{Context, Result};
use parking_lot::{Mutex, RwLock};
use uuid::Uuid;

use workflow::{Answers, Graph};

use crate::choice::ChoiceBoard;
use crate::exec::{Dispatcher, WorkerPool};
use crate::fs::Fs;

/// A directory tree and where it is in the workflow
mod unit;
pub use unit::{Unit, UnitKind, UnitStatus};

/// Durable progress records
mod store;
pub use store::{MemoryStore, Progress, ProgressStore};

/// FIFO bound on concurrently progressing units
mod admission;
pub use admission::{Admission, Permit, Ticket};

/// The per-unit state machine
mod progression;
use progression::UnitRunner;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Unknown unit kind \"{0}\" (expected \"transfer\" or \"sip\")")]
    UnknownUnitKind(String),
    #[error("Workflow has no start link for unit kind \"{0}\"")]
    NoStartLink(String),
    #[error("Can't install a new workflow while {0} units are active")]
    CutoverWhileActive(usize),
    #[error("No progress record for unit {0}")]
    UnknownUnit(Uuid),
    #[error("Unit {0} is already running")]
    AlreadyRunning(Uuid),
    #[error("Engine halted after a workflow integrity error")]
    Halted,
    #[error("Unit path is not a directory: {0}")]
    NotADirectory(String),
}

/// Why a unit ended up `failed`.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum UnitError {
    #[error("Task at link \"{link}\" exited with code {code}, and the link has no transition for it")]
    TaskExecution { link: String, code: i32 },
    #[error("Workflow sent the unit to \"failed\" after link \"{0}\"")]
    WorkflowFailed(String),
    #[error("No choice was made at link \"{0}\" before the timeout")]
    ChoiceTimeout(String),
    #[error("Link \"{link}\" pulls \"{var}\", but its value \"{value}\" names no link")]
    UnknownPulledLink {
        link: String,
        var: String,
        value: String,
    },
}

/// How a unit thread ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Completed,
    Failed(UnitError),
    /// stopped on request; progress is left resumable
    Cancelled,
    /// stopped by an engine-level problem; progress is left resumable
    Halted(String),
}

#[derive(Debug, Clone)]
pub struct UnitReport {
    pub uuid: Uuid,
    pub name: String,
    pub outcome: Outcome,
    /// the link the unit was at when it stopped
    pub link: String,
    /// number of link-to-link transitions made in this run
    pub transitions: usize,
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// max units progressing at once; `None` is unbounded
    pub max_units: Option<usize>,
    /// size of the shared job pool
    pub workers: usize,
    /// how long a unit waits for a choice; `None` waits forever
    pub choice_timeout: Option<Duration>,
    /// value of `%sharedPath%`
    pub shared_path: Option<PathBuf>,
    /// directory searched for task executables
    pub scripts: Option<PathBuf>,
    /// copy job output to the terminal
    pub echo: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_units: None,
            workers: 4,
            choice_timeout: None,
            shared_path: None,
            scripts: None,
            echo: false,
        }
    }
}

/// Current graph plus the automatic answers that were validated against it.
#[derive(Debug, Clone)]
struct Snapshot {
    graph: Arc<Graph>,
    answers: Arc<Answers>,
}

struct Running {
    uuid: Uuid,
    cancel: Arc<AtomicBool>,
    handle: JoinHandle<UnitReport>,
}

/// Drives any number of units through one shared workflow graph.
///
/// Each admitted unit runs on its own thread; their jobs share one worker pool.
/// Progress is persisted after every transition, so a new engine over the same
/// store can `resume` where an old one stopped.
pub struct Engine {
    snapshot: RwLock<Snapshot>,
    store: Arc<dyn ProgressStore>,
    dispatcher: Arc<Dispatcher>,
    board: Arc<ChoiceBoard>,
    admission: Arc<Admission>,
    halt: Arc<AtomicBool>,
    running: Mutex<Vec<Running>>,
    config: EngineConfig,
}

impl Engine {
    pub fn new(
        graph: Graph,
        answers: Answers,
        store: Arc<dyn ProgressStore>,
        fs: Fs,
        config: EngineConfig,
    ) -> Result<Self> {
        let pool = WorkerPool::new(config.workers)?;
        let dispatcher = Dispatcher::new(pool, fs, config.scripts.clone(), config.echo);
        Ok(Self {
            snapshot: RwLock::new(Snapshot {
                graph: Arc::new(graph),
                answers: Arc::new(answers),
            }),
            store,
            dispatcher: Arc::new(dispatcher),
            board: Arc::new(ChoiceBoard::default()),
            admission: Admission::new(config.max_units),
            halt: Arc::new(AtomicBool::new(false)),
            running: Mutex::new(Vec::new()),
            config,
        })
    }

    pub fn graph(&self) -> Arc<Graph> {
        Arc::clone(&self.snapshot.read().graph)
    }

    /// Where pending choices show up and answers are delivered.
    pub fn board(&self) -> Arc<ChoiceBoard> {
        Arc::clone(&self.board)
    }

    pub fn is_halted(&self) -> bool {
        self.halt.load(Ordering::SeqCst)
    }

    /// Start a new unit for the directory at `path`.
    pub fn submit(&self, path: &Path, kind: UnitKind) -> Result<Uuid> {
        if !path.is_dir() {
            return Err(Error::NotADirectory(path.to_string_lossy().into_owned()).into());
        }
        let mut running = self.running.lock();
        let snap = self.snapshot.read().clone();
        let start = snap
            .graph
            .start_for(kind.as_str())
            .ok_or_else(|| Error::NoStartLink(kind.to_string()))?;
        let unit = Unit::new(Uuid::new_v4(), path, kind, start, self.config.shared_path.as_deref())?;
        self.store
            .save_progress(&Progress::of(&unit, &snap.graph))
            .context("while saving initial progress")?;
        log::info!("{}: submitted as {} at \"{}\"", unit.name, unit.uuid, snap.graph.name(start));
        self.launch(&mut running, unit, snap)
    }

    /// Restart every unit the store says was still active or waiting on a choice.
    /// All records are checked against the current graph before any unit starts.
    pub fn resume(&self) -> Result<Vec<Uuid>> {
        let mut running = self.running.lock();
        let snap = self.snapshot.read().clone();

        let mut units = Vec::new();
        for progress in self.store.list()? {
            if !progress.status.is_resumable() {
                continue;
            }
            if running.iter().any(|r| r.uuid == progress.uuid && !r.handle.is_finished()) {
                log::debug!("{}: already running, not resuming", progress.name);
                continue;
            }
            let unit = restore(&progress, &snap.graph)
                .with_context(|| format!("while resuming unit {}", progress.uuid))?;
            units.push((unit, progress));
        }

        let mut uuids = Vec::with_capacity(units.len());
        for (unit, progress) in units {
            if progress.in_flight {
                log::warn!(
                    "{}: task at \"{}\" may have been interrupted; running it again",
                    unit.name,
                    progress.link
                );
            }
            if progress.graph_version != snap.graph.version() {
                log::info!(
                    "{}: saved under workflow version {}, resuming on version {}",
                    unit.name,
                    progress.graph_version,
                    snap.graph.version()
                );
            }
            log::info!("{}: resuming at \"{}\"", unit.name, progress.link);
            uuids.push(self.launch(&mut running, unit, snap.clone())?);
        }
        Ok(uuids)
    }

    /// Send a stopped unit back into the workflow at `link`, keeping its variables.
    pub fn requeue(&self, uuid: Uuid, link: &str) -> Result<()> {
        let mut running = self.running.lock();
        if running.iter().any(|r| r.uuid == uuid && !r.handle.is_finished()) {
            return Err(Error::AlreadyRunning(uuid).into());
        }
        let snap = self.snapshot.read().clone();
        let progress = self.store.load_progress(uuid)?.ok_or(Error::UnknownUnit(uuid))?;
        let mut unit = restore(&progress, &snap.graph)?;
        unit.current = snap.graph.require(link)?;
        unit.status = UnitStatus::Active;
        self.store.save_progress(&Progress::of(&unit, &snap.graph))?;
        log::info!("{}: requeued at \"{link}\"", unit.name);
        self.launch(&mut running, unit, snap)?;
        Ok(())
    }

    /// Ask a unit to stop at its next opportunity. Returns false if it isn't running.
    pub fn cancel(&self, uuid: Uuid) -> bool {
        let running = self.running.lock();
        match running.iter().find(|r| r.uuid == uuid && !r.handle.is_finished()) {
            Some(r) => {
                r.cancel.store(true, Ordering::SeqCst);
                true
            }
            None => false,
        }
    }

    /// Number of unit threads that haven't finished, including those awaiting choices.
    pub fn active_units(&self) -> usize {
        self.running.lock().iter().filter(|r| !r.handle.is_finished()).count()
    }

    pub fn is_idle(&self) -> bool {
        self.active_units() == 0
    }

    /// Replace the graph. Only allowed while no unit is active, so that every
    /// unit runs start to finish (or to its next stop) on a single snapshot.
    pub fn install_graph(&self, graph: Graph, answers: Answers) -> Result<()> {
        let running = self.running.lock();
        let active = running.iter().filter(|r| !r.handle.is_finished()).count();
        if active > 0 {
            return Err(Error::CutoverWhileActive(active).into());
        }
        let mut snap = self.snapshot.write();
        log::info!(
            "installing workflow version {} (was {})",
            graph.version(),
            snap.graph.version()
        );
        *snap = Snapshot {
            graph: Arc::new(graph),
            answers: Arc::new(answers),
        };
        self.halt.store(false, Ordering::SeqCst);
        Ok(())
    }

    /// Wait for every unit launched so far, returning reports in launch order.
    pub fn join(&self) -> Vec<UnitReport> {
        let mut reports = Vec::new();
        loop {
            let batch: Vec<Running> = self.running.lock().drain(..).collect();
            if batch.is_empty() {
                return reports;
            }
            for r in batch {
                match r.handle.join() {
                    Ok(report) => reports.push(report),
                    Err(_) => {
                        log::error!("unit thread for {} panicked", r.uuid);
                        reports.push(UnitReport {
                            uuid: r.uuid,
                            name: r.uuid.to_string(),
                            outcome: Outcome::Halted(String::from("unit thread panicked")),
                            link: String::new(),
                            transitions: 0,
                        });
                    }
                }
            }
        }
    }

    fn launch(&self, running: &mut Vec<Running>, unit: Unit, snap: Snapshot) -> Result<Uuid> {
        if self.is_halted() {
            return Err(Error::Halted.into());
        }
        let uuid = unit.uuid;
        let cancel = Arc::new(AtomicBool::new(false));
        // taken here so admission order is launch order:
        let ticket = self.admission.ticket();
        let runner = self.runner(snap, Arc::clone(&cancel));
        let handle = thread::Builder::new()
            .name(format!("unit-{}", unit.name))
            .spawn(move || runner.run(unit, ticket))
            .context("spawning unit thread")?;
        running.push(Running {
            uuid,
            cancel,
            handle,
        });
        Ok(uuid)
    }
}

impl Engine {
    fn runner(&self, snap: Snapshot, cancel: Arc<AtomicBool>) -> UnitRunner {
        UnitRunner {
            graph: snap.graph,
            answers: snap.answers,
            store: Arc::clone(&self.store),
            dispatcher: Arc::clone(&self.dispatcher),
            board: Arc::clone(&self.board),
            admission: Arc::clone(&self.admission),
            halt: Arc::clone(&self.halt),
            cancel,
            choice_timeout: self.config.choice_timeout,
        }
    }
}

/// Rebuild a unit from its record, checking its links exist in `graph`.
fn restore(progress: &Progress, graph: &Graph) -> Result<Unit> {
    let current = graph.require(&progress.link)?;
    let magic = progress
        .magic
        .as_deref()
        .map(|name| graph.require(name))
        .transpose()?;
    Ok(Unit {
        uuid: progress.uuid,
        path: progress.path.clone(),
        kind: progress.kind,
        name: progress.name.clone(),
        current,
        vars: progress.vars.clone(),
        status: UnitStatus::Active,
        magic,
    })
}

#[cfg(test)]
mod test {
    use super::*;
    use std::time::Instant;
    use tempfile::tempdir;
    use workflow::GraphIntegrityError;

    const SPIN: &str = r#"
start transfer -> @spin
link spin {
    run per-unit /bin/sh "-c 'sleep 0.05'"
    exit 0 -> @spin
}
"#;

    #[test]
    fn test_integrity_error_halts_other_units() -> Result<()> {
        let dir = tempdir()?;
        let unit = dir.path().join("spinner");
        std::fs::create_dir_all(&unit)?;
        let (graph, answers) = Graph::load(syntax::parse(SPIN)?)?;
        let store = Arc::new(MemoryStore::default());
        let engine = Engine::new(
            graph,
            answers,
            store.clone(),
            Fs::new(dir.path()),
            EngineConfig::default(),
        )?;

        let uuid = engine.submit(&unit, UnitKind::Transfer)?;
        let start = Instant::now();
        while store.history().iter().filter(|p| p.in_flight).count() < 2 {
            assert!(start.elapsed() < Duration::from_secs(5), "unit never looped");
            thread::sleep(Duration::from_millis(10));
        }

        // another unit running on the same snapshot finds a dangling reference:
        let snap = engine.snapshot.read().clone();
        let other = engine.runner(snap, Arc::new(AtomicBool::new(false)));
        let outcome = other.integrity(GraphIntegrityError::UnknownId(99, 1));
        assert!(matches!(outcome, Outcome::Halted(_)));
        assert!(engine.is_halted());

        let reports = engine.join();
        assert_eq!(uuid, reports[0].uuid);
        assert!(matches!(reports[0].outcome, Outcome::Halted(_)));
        let progress = store.load_progress(uuid)?.expect("progress was saved");
        assert_eq!("spin", progress.link);
        assert!(progress.status.is_resumable());

        let refused = engine.submit(&unit, UnitKind::Transfer);
        assert!(refused.is_err());

        // installing a graph clears the halt:
        let (graph, answers) = Graph::load(syntax::parse(SPIN)?)?;
        engine.install_graph(graph, answers)?;
        assert!(!engine.is_halted());
        Ok(())
    }
}
