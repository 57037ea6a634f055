use clap::{ArgAction, Parser};

const CMD_NAME: &str = "pf";
const DEFAULT_WORKFLOW: &str = "workflow.pfw";
const DEFAULT_STATE: &str = "state";
const DEFAULT_WORKERS: &str = "4";
const DEFAULT_KIND: &str = "transfer";

/// Stores our command-line args format.
#[derive(Parser, Debug)]
#[command(name = CMD_NAME, version, about = None, long_about = None)]
pub struct Args {
    /// Unit directories to start
    #[arg(value_name = "DIR")]
    pub units: Vec<String>,

    /// Workflow definition file
    #[arg(short, long, value_name = "FILE", default_value = DEFAULT_WORKFLOW)]
    #[arg(env = "PRESERVE_FLOW_WORKFLOW")]
    pub workflow: String,

    /// Directory holding unit progress records
    #[arg(short, long, value_name = "DIR", default_value = DEFAULT_STATE)]
    #[arg(env = "PRESERVE_FLOW_STATE")]
    pub state: String,

    /// Kind of the new units ("transfer" or "sip")
    #[arg(short, long, value_name = "KIND", default_value = DEFAULT_KIND)]
    pub kind: String,

    /// Processing configuration file with automatic choice answers
    #[arg(short, long, value_name = "FILE")]
    pub answers: Option<String>,

    /// Resume units left active or awaiting a choice by an earlier run
    #[arg(short, long)]
    pub resume: bool,

    /// Requeue a stopped unit at a link
    #[arg(long, value_name = "UUID:LINK")]
    pub requeue: Vec<String>,

    /// Only check the workflow (and answers) file, then exit
    #[arg(short, long)]
    pub check: bool,

    /// Number of job workers
    #[arg(short = 'j', long, value_name = "N", default_value = DEFAULT_WORKERS)]
    pub workers: usize,

    /// Max units progressing at once (0 = no limit)
    #[arg(short, long, value_name = "N", default_value = "0")]
    pub max_units: usize,

    /// Seconds a unit waits for a choice before failing
    #[arg(short = 't', long, value_name = "SECS")]
    pub choice_timeout: Option<u64>,

    /// Never prompt for choices; units without an automatic answer time out
    #[arg(short, long)]
    pub non_interactive: bool,

    /// Directory searched for task executables before PATH
    #[arg(long, value_name = "DIR")]
    pub scripts: Option<String>,

    /// Value of %sharedPath%
    #[arg(long, value_name = "DIR")]
    pub shared: Option<String>,

    /// Print additional debugging info (repeat for more)
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,
}
