use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;

use workflow::{
    Answers, ChainLink, ChoiceOption, ExecTask, Graph, GraphIntegrityError, LinkId, Next, SetValue,
    Target, TaskDescriptor,
};

use super::{Admission, Outcome, Permit, Progress, ProgressStore, Ticket, Unit, UnitError, UnitReport, UnitStatus};
use crate::choice::{ChoiceBoard, PendingChoice, WaitError};
use crate::exec::{DispatchError, Dispatcher, Severity, UnitContext};

/// What a task left for the graph to decide.
enum Step {
    /// resolve through the link's exit code table
    Code(i32),
    /// the task picked the next link itself
    Next(Next),
}

/// Everything one unit thread needs. The graph is the snapshot that was
/// current when the unit launched, and stays fixed for the whole run.
pub(super) struct UnitRunner {
    pub graph: Arc<Graph>,
    pub answers: Arc<Answers>,
    pub store: Arc<dyn ProgressStore>,
    pub dispatcher: Arc<Dispatcher>,
    pub board: Arc<ChoiceBoard>,
    pub admission: Arc<Admission>,
    pub halt: Arc<AtomicBool>,
    pub cancel: Arc<AtomicBool>,
    pub choice_timeout: Option<Duration>,
}

impl UnitRunner {
    pub fn run(self, mut unit: Unit, ticket: Ticket) -> UnitReport {
        let mut transitions = 0;
        let outcome = match ticket.wait(&self.cancel) {
            Some(permit) => self.drive(&mut unit, permit, &mut transitions),
            None => Outcome::Cancelled,
        };
        let outcome = self.finish(&mut unit, outcome);

        match &outcome {
            Outcome::Completed => log::info!("{}: completed", unit.name),
            Outcome::Failed(e) => log::warn!("{}: failed: {e}", unit.name),
            Outcome::Cancelled => log::info!("{}: cancelled", unit.name),
            Outcome::Halted(why) => log::error!("{}: halted: {why}", unit.name),
        }
        UnitReport {
            uuid: unit.uuid,
            link: self.graph.name(unit.current).to_owned(),
            name: unit.name,
            outcome,
            transitions,
        }
    }

    /// One transition per iteration until the unit stops.
    fn drive(&self, unit: &mut Unit, permit: Permit, transitions: &mut usize) -> Outcome {
        let mut permit = Some(permit);
        loop {
            if self.cancel.load(Ordering::SeqCst) {
                return Outcome::Cancelled;
            }
            if self.halt.load(Ordering::SeqCst) {
                return Outcome::Halted(String::from("engine halted by another unit"));
            }

            let link_id = unit.current;
            let link = match self.graph.get(link_id) {
                Ok(link) => link,
                Err(e) => return self.integrity(e),
            };
            log::debug!("{}: at \"{}\" ({})", unit.name, link.name, link.task.kind());

            let step = match self.step(unit, link_id, link, &mut permit) {
                Ok(step) => step,
                Err(outcome) => return outcome,
            };
            // jobs have drained by now; the link runs again on resume:
            if self.cancel.load(Ordering::SeqCst) {
                return Outcome::Cancelled;
            }
            let (next, code) = match step {
                Step::Code(code) => match self.graph.resolve_next(link_id, code) {
                    Ok(next) => (next, code),
                    Err(e) => return self.integrity(e),
                },
                Step::Next(next) => (next, 0),
            };
            *transitions += 1;

            match next {
                Next::Link(id) => {
                    log::info!("{}: \"{}\" -> \"{}\"", unit.name, link.name, self.graph.name(id));
                    unit.current = id;
                    unit.status = UnitStatus::Active;
                    if let Err(e) = self.persist(unit, false) {
                        return halted(e);
                    }
                }
                Next::Done => return Outcome::Completed,
                Next::Failed => return Outcome::Failed(UnitError::WorkflowFailed(link.name.clone())),
                Next::End if code == 0 => return Outcome::Completed,
                Next::End => {
                    return Outcome::Failed(UnitError::TaskExecution {
                        link: link.name.clone(),
                        code,
                    })
                }
            }
        }
    }

    fn step(
        &self,
        unit: &mut Unit,
        link_id: LinkId,
        link: &ChainLink,
        permit: &mut Option<Permit>,
    ) -> Result<Step, Outcome> {
        use TaskDescriptor::*;
        match &link.task {
            Exec(task) => self.exec(unit, link, task),
            Choice(options) => self.choose(unit, link_id, link, options, permit),
            SetVariable { var, value } => {
                let value = match value {
                    SetValue::Text(s) => s.clone(),
                    SetValue::Link(id) => self.graph.name(*id).to_owned(),
                };
                unit.vars.set(var.as_str(), value);
                Ok(Step::Code(0))
            }
            // the variable is unit data, so a bad value fails only this unit:
            LinkPull { var } => match unit.vars.get(var) {
                Some(name) => match self.graph.by_name(name) {
                    Some(id) => Ok(Step::Next(Next::Link(id))),
                    None => Err(Outcome::Failed(UnitError::UnknownPulledLink {
                        link: link.name.clone(),
                        var: var.clone(),
                        value: name.to_owned(),
                    })),
                },
                None => self.next_or_halt(self.graph.default_next(link_id)),
            },
            AssignMagicLink(id) => {
                unit.magic = Some(*id);
                Ok(Step::Code(0))
            }
            GotoMagicLink => match unit.magic {
                Some(id) => self.next_or_halt(self.graph.check_target(Target::Link(id))),
                None => self.next_or_halt(self.graph.default_next(link_id)),
            },
        }
    }

    fn exec(&self, unit: &mut Unit, link: &ChainLink, task: &ExecTask) -> Result<Step, Outcome> {
        // a crash between here and the next save means this link runs again:
        self.persist(unit, true).map_err(halted)?;

        let ctx = UnitContext {
            uuid: unit.uuid,
            name: &unit.name,
            root: &unit.path,
            vars: &unit.vars,
        };
        match self.dispatcher.run(task, ctx) {
            Ok(result) => {
                match result.severity {
                    Severity::Success => log::debug!("{}: \"{}\" succeeded", unit.name, link.name),
                    Severity::Warning => log::warn!(
                        "{}: \"{}\" succeeded with output on stderr: {}",
                        unit.name,
                        link.name,
                        result.stderr.trim_end()
                    ),
                    Severity::Failure => log::warn!(
                        "{}: \"{}\" exited with code {} ({} job(s))",
                        unit.name,
                        link.name,
                        result.exit_code,
                        result.jobs
                    ),
                }
                Ok(Step::Code(result.exit_code))
            }
            Err(DispatchError::Unresolved(e)) => {
                log::error!("{}: {e} in task at \"{}\"; no jobs were run", unit.name, link.name);
                Ok(Step::Code(1))
            }
            Err(DispatchError::Other(e)) => {
                log::error!("{}: task at \"{}\" could not run: {e:#}", unit.name, link.name);
                Ok(Step::Code(1))
            }
        }
    }

    fn choose(
        &self,
        unit: &mut Unit,
        link_id: LinkId,
        link: &ChainLink,
        options: &[ChoiceOption],
        permit: &mut Option<Permit>,
    ) -> Result<Step, Outcome> {
        let idx = match self.answers.get(link_id) {
            Some(idx) => idx,
            None => self.await_choice(unit, link_id, link, options, permit)?,
        };
        let Some(option) = options.get(idx) else {
            return Err(Outcome::Halted(format!("choice {idx} out of range at \"{}\"", link.name)));
        };
        log::info!("{}: \"{}\" chosen at \"{}\"", unit.name, option.name, link.name);

        unit.vars.merge(&option.assignments);
        match option.next {
            Some(target) => self.next_or_halt(self.graph.check_target(target)),
            None => Ok(Step::Code(0)),
        }
    }

    /// Suspend this unit until a choice arrives. The admission slot is handed
    /// back while waiting and re-queued for afterwards.
    fn await_choice(
        &self,
        unit: &mut Unit,
        link_id: LinkId,
        link: &ChainLink,
        options: &[ChoiceOption],
        permit: &mut Option<Permit>,
    ) -> Result<usize, Outcome> {
        unit.status = UnitStatus::AwaitingChoice;
        self.persist(unit, false).map_err(halted)?;
        permit.take();

        self.board.open(PendingChoice {
            unit: unit.uuid,
            unit_name: unit.name.clone(),
            link: link_id,
            link_name: link.name.clone(),
            options: options
                .iter()
                .map(|o| (o.name.clone(), o.description.clone()))
                .collect(),
        });
        let idx = match self.board.wait(unit.uuid, self.choice_timeout, &self.cancel) {
            Ok(idx) => idx,
            Err(WaitError::Timeout) => {
                return Err(Outcome::Failed(UnitError::ChoiceTimeout(link.name.clone())))
            }
            Err(WaitError::Cancelled) => return Err(Outcome::Cancelled),
        };

        unit.status = UnitStatus::Active;
        match self.admission.ticket().wait(&self.cancel) {
            Some(p) => *permit = Some(p),
            None => return Err(Outcome::Cancelled),
        }
        Ok(idx)
    }

    fn next_or_halt(&self, next: Result<Next, GraphIntegrityError>) -> Result<Step, Outcome> {
        next.map(Step::Next).map_err(|e| self.integrity(e))
    }

    /// Stop every unit: the graph can't be trusted anymore.
    pub(super) fn integrity(&self, e: GraphIntegrityError) -> Outcome {
        log::error!("workflow integrity error, halting engine: {e}");
        self.halt.store(true, Ordering::SeqCst);
        Outcome::Halted(e.to_string())
    }

    /// Record terminal states. Cancelled and halted units keep their last
    /// saved position so they can be resumed.
    fn finish(&self, unit: &mut Unit, outcome: Outcome) -> Outcome {
        let failure = match &outcome {
            Outcome::Completed => None,
            Outcome::Failed(e) => Some(e.to_string()),
            Outcome::Cancelled | Outcome::Halted(_) => return outcome,
        };
        unit.status = match failure {
            Some(_) => UnitStatus::Failed,
            None => UnitStatus::Completed,
        };
        let mut progress = Progress::of(unit, &self.graph);
        progress.failure = failure;
        match self.store.save_progress(&progress) {
            Ok(()) => outcome,
            Err(e) => halted(e),
        }
    }

    fn persist(&self, unit: &Unit, in_flight: bool) -> Result<()> {
        let mut progress = Progress::of(unit, &self.graph);
        progress.in_flight = in_flight;
        self.store.save_progress(&progress)
    }
}

fn halted(e: anyhow::Error) -> Outcome {
    Outcome::Halted(format!("could not save progress: {e:#}"))
}
