use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use util::PathEncodingError;
use workflow::{LinkId, Variables};

use super::Error;

/// Where a unit is in its life cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum UnitStatus {
    Active,
    AwaitingChoice,
    Completed,
    Failed,
}

impl UnitStatus {
    /// Units in these states are picked up again by `resume`.
    pub fn is_resumable(self) -> bool {
        matches!(self, Self::Active | Self::AwaitingChoice)
    }
}

/// The two kinds of unit a workflow can start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnitKind {
    Transfer,
    Sip,
}

impl UnitKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Transfer => "transfer",
            Self::Sip => "sip",
        }
    }
}

impl FromStr for UnitKind {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "transfer" => Ok(Self::Transfer),
            "sip" => Ok(Self::Sip),
            _ => Err(Error::UnknownUnitKind(s.to_owned())),
        }
    }
}

impl std::fmt::Display for UnitKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A directory tree moving through the workflow.
/// Owned by exactly one unit thread while it runs.
#[derive(Debug, Clone)]
pub struct Unit {
    pub uuid: Uuid,
    pub path: PathBuf,
    pub kind: UnitKind,
    pub name: String,
    pub current: LinkId,
    pub vars: Variables,
    pub status: UnitStatus,
    /// saved by `magic @link`, used by `goto-magic`
    pub magic: Option<LinkId>,
}

impl Unit {
    /// Create a new unit at `start`, with the built-in variables filled in.
    pub fn new(
        uuid: Uuid,
        path: &Path,
        kind: UnitKind,
        start: LinkId,
        shared_path: Option<&Path>,
    ) -> Result<Self, PathEncodingError> {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or(PathEncodingError)?
            .to_owned();
        let vars = builtin_vars(uuid, path, kind, &name, shared_path)?;
        Ok(Self {
            uuid,
            path: path.to_path_buf(),
            kind,
            name,
            current: start,
            vars,
            status: UnitStatus::Active,
            magic: None,
        })
    }
}

/// Variables every unit starts with. Directories end with '/', so templates
/// can write `%SIPLogsDirectory%name.log`.
fn builtin_vars(
    uuid: Uuid,
    path: &Path,
    kind: UnitKind,
    name: &str,
    shared_path: Option<&Path>,
) -> Result<Variables, PathEncodingError> {
    let dir = dir_string(path)?;
    let mut vars = Variables::default();
    vars.set("SIPUUID", uuid.to_string());
    vars.set("SIPName", name);
    vars.set("SIPLogsDirectory", format!("{dir}logs/"));
    vars.set("SIPObjectsDirectory", format!("{dir}objects/"));
    vars.set("SIPDirectory", dir);
    vars.set("unitType", kind.as_str());
    if let Some(shared) = shared_path {
        vars.set("sharedPath", dir_string(shared)?);
    }
    Ok(vars)
}

fn dir_string(path: &Path) -> Result<String, PathEncodingError> {
    let mut s = path.to_str().ok_or(PathEncodingError)?.to_owned();
    if !s.ends_with('/') {
        s.push('/');
    }
    Ok(s)
}
