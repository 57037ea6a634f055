use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use colored::Colorize;
use uuid::Uuid;

use util::HashSet;
use workflow::{Answers, Graph, LinkId};

use crate::choice::Ack;
use crate::engine::{Engine, EngineConfig, Outcome, UnitReport};
use crate::fs::{FileStore, Fs};
use crate::settings::Settings;
use crate::ui::Ui;

// how often the prompt loop looks for new choices:
const PROMPT_POLL: Duration = Duration::from_millis(200);

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("{0} of {1} units did not complete")]
    UnitsDidNotComplete(usize, usize),
}

/// This struct actually runs the command-line app.
pub struct App {
    /// Interpreted command line settings
    settings: Settings,
    /// Filesystem interface
    fs: Fs,
    /// User interface
    ui: Ui,
}

impl App {
    /// Create a new `App`.
    pub fn new(settings: Settings) -> Self {
        let fs = Fs::new(&settings.state);
        let ui = Ui::new(&settings);
        Self { settings, fs, ui }
    }

    /// Run the app: load the workflow, start or resume units, and wait for them.
    pub fn run(mut self) -> Result<()> {
        let (graph, answers) = self.load_workflow()?;

        if self.settings.check {
            eprintln!(
                "{} {} links, {} automatic answers.",
                "Workflow OK:".green(),
                graph.len(),
                answers.len()
            );
            return Ok(());
        }

        self.ui.verbose_msg(&format!("Using state directory {:?}", self.settings.state));
        self.fs.ensure_state_dir_exists(self.ui.verbose)?;
        let store = FileStore::new(self.fs.clone())?;

        let config = EngineConfig {
            max_units: self.settings.max_units,
            workers: self.settings.workers,
            choice_timeout: self.settings.choice_timeout,
            shared_path: self.settings.shared.clone(),
            scripts: self.settings.scripts.clone(),
            echo: self.settings.verbose > 1,
        };
        let engine = Engine::new(graph, answers, Arc::new(store), self.fs.clone(), config)?;

        self.start_units(&engine)?;

        if self.settings.interactive {
            self.prompt_choices(&engine)?;
        }
        let reports = engine.join();
        self.finish(&reports)
    }

    fn start_units(&self, engine: &Engine) -> Result<()> {
        if self.settings.resume {
            let resumed = engine.resume().context("while resuming units")?;
            eprintln!("Resumed {} units.", resumed.len());
        }
        for (uuid, link) in &self.settings.requeue {
            engine
                .requeue(*uuid, link)
                .with_context(|| format!("while requeueing unit {uuid} at \"{link}\""))?;
        }
        for path in &self.settings.units {
            let uuid = engine
                .submit(path, self.settings.kind)
                .with_context(|| format!("while starting unit {:?}", path))?;
            eprintln!("{} {:?} as {uuid}", "STARTED".green(), path);
        }
        Ok(())
    }

    /// Ask the user about every choice nobody answered automatically,
    /// until all units have stopped.
    fn prompt_choices(&self, engine: &Engine) -> Result<()> {
        let board = engine.board();
        let mut asked = HashSet::default();
        while !engine.is_idle() {
            let current = board.pending();
            // a unit that comes back to the same link gets asked again:
            asked.retain(|key: &(Uuid, LinkId)| current.iter().any(|p| (p.unit, p.link) == *key));
            for pending in current {
                if !asked.insert((pending.unit, pending.link)) {
                    continue;
                }
                let option = self.ui.prompt_choice(&pending)?;
                match board.submit(pending.link, pending.unit, &option) {
                    Ack::Accepted => (),
                    ack => eprintln!("{} {ack:?}", "Choice not applied:".yellow()),
                }
            }
            board.wait_for_change(PROMPT_POLL);
        }
        Ok(())
    }

    fn finish(&self, reports: &[UnitReport]) -> Result<()> {
        eprintln!();
        for report in reports {
            self.ui.print_report(report);
        }
        let incomplete = reports
            .iter()
            .filter(|r| r.outcome != Outcome::Completed)
            .count();
        if incomplete > 0 {
            Err(Error::UnitsDidNotComplete(incomplete, reports.len()).into())
        } else {
            Ok(())
        }
    }
}

// LOADING //////////////////
impl App {
    fn load_workflow(&mut self) -> Result<(Graph, Answers)> {
        let mut strbuf = String::with_capacity(0); // will be resized later.
        let workflow_path = self.settings.workflow.clone();
        self.read_to_buf(&workflow_path, &mut strbuf)?;

        self.ui.verbose_progress("Loading workflow");
        self.ui.start_timer();
        let items = syntax::parse(&strbuf)
            .with_context(|| format!("while parsing workflow file {:?}", workflow_path))?;
        let (graph, mut answers) = Graph::load(items)
            .with_context(|| format!("while loading workflow file {:?}", workflow_path))?;
        self.ui.done();
        self.ui.print_elapsed("Loading workflow");

        if let Some(path) = self.settings.answers.clone() {
            self.read_to_buf(&path, &mut strbuf)?;
            let items = syntax::parse(&strbuf)
                .with_context(|| format!("while parsing answers file {:?}", path))?;
            let extra = Answers::load(items, &graph)
                .with_context(|| format!("while loading answers file {:?}", path))?;
            answers.extend(extra);
        }

        log::info!(
            "workflow has {} links and {} automatic answers",
            graph.len(),
            answers.len()
        );
        Ok((graph, answers))
    }

    fn read_to_buf(&self, path: &Path, strbuf: &mut String) -> Result<()> {
        self.ui.verbose_progress_debug("Reading", path);
        self.fs
            .read_to_buf(path, strbuf)
            .with_context(|| format!("while reading {:?}", path))?;
        self.ui.done();
        Ok(())
    }
}
