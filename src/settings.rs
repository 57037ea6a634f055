use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use uuid::Uuid;

use crate::args::Args;
use crate::engine::UnitKind;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Workflow file not found: \"{0}\"")]
    WorkflowNotFound(String),
    #[error("Answers file not found: \"{0}\"")]
    AnswersNotFound(String),
    #[error("Unit directory not found: \"{0}\"")]
    UnitNotFound(String),
    #[error("invalid requeue flag '{0}' (should be formatted 'UUID:LINK')")]
    InvalidRequeueFlag(String),
    #[error("Nothing to do: give unit directories, --resume, --requeue or --check")]
    NothingToDo,
    #[error("At least one worker is required")]
    NoWorkers,
}

/// Settings are like Args, except all the logic has
/// been applied so e.g. defaults are added in.
#[derive(Debug)]
pub struct Settings {
    pub workflow: PathBuf,
    pub state: PathBuf,
    pub answers: Option<PathBuf>,
    pub units: Vec<PathBuf>,
    pub kind: UnitKind,
    pub resume: bool,
    pub requeue: Vec<(Uuid, String)>,
    pub check: bool,
    pub workers: usize,
    pub max_units: Option<usize>,
    pub choice_timeout: Option<Duration>,
    pub interactive: bool,
    pub scripts: Option<PathBuf>,
    pub shared: Option<PathBuf>,
    pub verbose: u8,
}

impl TryFrom<Args> for Settings {
    type Error = anyhow::Error;
    fn try_from(args: Args) -> Result<Self, Self::Error> {
        if args.units.is_empty() && !args.resume && args.requeue.is_empty() && !args.check {
            return Err(Error::NothingToDo.into());
        }
        if args.workers == 0 {
            return Err(Error::NoWorkers.into());
        }

        let workflow = existing(&args.workflow).ok_or(Error::WorkflowNotFound(args.workflow))?;
        let answers = match args.answers {
            Some(a) => Some(existing(&a).ok_or(Error::AnswersNotFound(a))?),
            None => None,
        };

        let mut units = Vec::with_capacity(args.units.len());
        for unit in args.units {
            let path = existing(&unit).ok_or(Error::UnitNotFound(unit))?;
            units.push(path);
        }

        let mut requeue = Vec::with_capacity(args.requeue.len());
        for flag in args.requeue {
            let (uuid, link) = flag
                .split_once(':')
                .ok_or_else(|| Error::InvalidRequeueFlag(flag.clone()))?;
            let uuid = Uuid::parse_str(uuid).map_err(|_| Error::InvalidRequeueFlag(flag.clone()))?;
            requeue.push((uuid, link.to_owned()));
        }

        // with nobody to ask, a missing answer fails the unit right away:
        let interactive = !args.non_interactive;
        let choice_timeout = match (args.choice_timeout, interactive) {
            (Some(secs), _) => Some(Duration::from_secs(secs)),
            (None, true) => None,
            (None, false) => Some(Duration::ZERO),
        };

        Ok(Self {
            workflow,
            state: PathBuf::from(&args.state),
            answers,
            units,
            kind: args.kind.parse()?,
            resume: args.resume,
            requeue,
            check: args.check,
            workers: args.workers,
            max_units: (args.max_units > 0).then_some(args.max_units),
            choice_timeout,
            interactive,
            scripts: args.scripts.map(PathBuf::from),
            shared: args.shared.map(PathBuf::from),
            verbose: args.verbose,
        })
    }
}

/// Canonical path, if something exists there.
fn existing(path: &str) -> Option<PathBuf> {
    PathBuf::from(path).canonicalize().ok()
}
