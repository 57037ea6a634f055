use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::mpsc;

use anyhow::Result;
use uuid::Uuid;

use workflow::{render_all, ExecTask, Overlay, Scope, Template, UnresolvedVariable, Variables};

use super::{collect_targets, run_cmd, CmdOutput, Error, ExecutionResult, WorkerPool};
use crate::fs::Fs;

/// The unit a task is being run for.
#[derive(Debug, Clone, Copy)]
pub struct UnitContext<'a> {
    pub uuid: Uuid,
    pub name: &'a str,
    pub root: &'a Path,
    pub vars: &'a Variables,
}

/// Why a task never got as far as running its jobs.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error(transparent)]
    Unresolved(#[from] UnresolvedVariable),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// A fully rendered job, ready to hand to the pool.
#[derive(Debug)]
struct Job {
    program: PathBuf,
    args: Vec<String>,
    cwd: PathBuf,
}

/// Turns an exec task into jobs on the shared pool and waits for all of them.
pub struct Dispatcher {
    pool: WorkerPool,
    fs: Fs,
    /// directory searched for bare executable names before `PATH`
    scripts: Option<PathBuf>,
    /// copy job output to our own stdout/stderr
    echo: bool,
}

impl Dispatcher {
    pub fn new(pool: WorkerPool, fs: Fs, scripts: Option<PathBuf>, echo: bool) -> Self {
        Self {
            pool,
            fs,
            scripts,
            echo,
        }
    }

    /// Run `task` for `unit`. Every argument of every job is rendered before the
    /// first job starts, so an unresolved variable means nothing ran at all.
    pub fn run(&self, task: &ExecTask, unit: UnitContext) -> Result<ExecutionResult, DispatchError> {
        if !unit.root.is_dir() {
            let root = unit.root.to_string_lossy().into_owned();
            return Err(anyhow::Error::from(Error::MissingUnitDir(root)).into());
        }
        let program = self.find_program(&task.exec);

        let jobs = match task.scope {
            Scope::PerUnit => vec![self.job(&program, &task.args, unit.root, unit.vars)?],
            Scope::PerFile => {
                let targets = collect_targets(unit.root, &task.filter)?;
                let mut jobs = Vec::with_capacity(targets.len());
                for target in &targets {
                    let file_vars = target.vars(unit.uuid).map_err(anyhow::Error::from)?;
                    let vars = Overlay::new(&file_vars, unit.vars);
                    jobs.push(self.job(&program, &task.args, unit.root, &vars)?);
                }
                jobs
            }
        };
        let stdout_log = render_log(task.stdout.as_ref(), unit.vars)?;
        let stderr_log = render_log(task.stderr.as_ref(), unit.vars)?;
        // a log we could never write is a task error, found before anything runs:
        let fs = self.fs.scoped(unit.root);
        for path in stdout_log.iter().chain(stderr_log.iter()) {
            fs.check_whitelist(path)?;
        }

        log::debug!("{}: dispatching {} job(s) of {:?}", unit.name, jobs.len(), task.exec);
        let outputs = self.run_jobs(jobs)?;
        let result = ExecutionResult::aggregate(outputs);

        // the jobs already ran, so their exit code stands either way:
        if let Some(path) = stdout_log {
            append_log(&fs, unit.name, &path, &result.stdout);
        }
        if let Some(path) = stderr_log {
            append_log(&fs, unit.name, &path, &result.stderr);
        }
        Ok(result)
    }

    fn job(
        &self,
        program: &Path,
        args: &[Template],
        cwd: &Path,
        vars: &impl workflow::Lookup,
    ) -> Result<Job, UnresolvedVariable> {
        Ok(Job {
            program: program.to_path_buf(),
            args: render_all(args, vars)?,
            cwd: cwd.to_path_buf(),
        })
    }

    /// Submit every job, then collect results back into submission order.
    fn run_jobs(&self, jobs: Vec<Job>) -> Result<Vec<CmdOutput>> {
        let total = jobs.len();
        let (tx, rx) = mpsc::channel();
        for (i, job) in jobs.into_iter().enumerate() {
            let tx = tx.clone();
            let echo = self.echo;
            self.pool.submit(move || {
                let mut cmd = Command::new(&job.program);
                cmd.args(&job.args).current_dir(&job.cwd);
                let out = run_cmd(&mut cmd, echo);
                // receiver only goes away if the dispatching unit did:
                let _ = tx.send((i, out));
            });
        }
        drop(tx);

        let mut outputs: Vec<Option<CmdOutput>> = (0..total).map(|_| None).collect();
        for (i, out) in rx.iter() {
            outputs[i] = Some(out);
        }
        let outputs: Option<Vec<_>> = outputs.into_iter().collect();
        outputs.ok_or_else(|| Error::LostJobs(total).into())
    }

    fn find_program(&self, exec: &str) -> PathBuf {
        if !exec.contains('/') {
            if let Some(dir) = &self.scripts {
                let candidate = dir.join(exec);
                if candidate.is_file() {
                    return candidate;
                }
            }
        }
        PathBuf::from(exec)
    }
}

fn append_log(fs: &Fs, unit: &str, path: &Path, text: &str) {
    if let Err(e) = fs.append_file(path, text.as_bytes()) {
        log::warn!("{unit}: could not append job output to {:?}: {e:#}", path);
    }
}

fn render_log(
    template: Option<&Template>,
    vars: &Variables,
) -> Result<Option<PathBuf>, UnresolvedVariable> {
    template
        .map(|t| t.render(vars).map(PathBuf::from))
        .transpose()
}

#[cfg(test)]
mod test {
    use super::*;
    use std::fs;
    use tempfile::tempdir;
    use workflow::{FileFilter, Template};

    fn dispatcher(state: &Path) -> Result<Dispatcher> {
        Ok(Dispatcher::new(WorkerPool::new(2)?, Fs::new(state), None, false))
    }

    fn sh_task(scope: Scope, script: &str) -> Result<ExecTask> {
        Ok(ExecTask {
            scope,
            exec: "/bin/sh".to_owned(),
            args: Template::parse_args(script)?,
            stdout: None,
            stderr: None,
            filter: FileFilter::default(),
        })
    }

    #[test]
    fn test_fan_out_max_exit_code() -> Result<()> {
        let state = tempdir()?;
        let unit = tempdir()?;
        fs::write(unit.path().join("A"), "0")?;
        fs::write(unit.path().join("B"), "1")?;
        let d = dispatcher(state.path())?;

        let task = sh_task(Scope::PerFile, r#"-c 'exit $(cat "$0")' %inputFile%"#)?;
        let vars = Variables::default();
        let ctx = UnitContext {
            uuid: Uuid::new_v4(),
            name: "u",
            root: unit.path(),
            vars: &vars,
        };
        let result = d.run(&task, ctx)?;
        assert_eq!(2, result.jobs);
        assert_eq!(1, result.exit_code);
        Ok(())
    }

    #[test]
    fn test_unresolved_runs_nothing() -> Result<()> {
        let state = tempdir()?;
        let unit = tempdir()?;
        fs::write(unit.path().join("a"), "")?;
        let marker = unit.path().join("ran");
        let d = dispatcher(state.path())?;

        let script = format!("-c 'touch {}' %nope%", marker.display());
        let task = sh_task(Scope::PerUnit, &script)?;
        let vars = Variables::default();
        let ctx = UnitContext {
            uuid: Uuid::new_v4(),
            name: "u",
            root: unit.path(),
            vars: &vars,
        };
        match d.run(&task, ctx) {
            Err(DispatchError::Unresolved(UnresolvedVariable(name))) => assert_eq!("nope", name),
            other => panic!("unexpected {other:?}"),
        }
        assert!(!marker.exists());
        Ok(())
    }

    #[test]
    fn test_stdout_log_appended() -> Result<()> {
        let state = tempdir()?;
        let unit = tempdir()?;
        let d = dispatcher(state.path())?;
        let mut task = sh_task(Scope::PerUnit, "-c 'echo hello %SIPName%'")?;
        task.stdout = Some(Template::parse("%SIPLogsDirectory%out.log")?);

        let mut vars = Variables::default();
        vars.set("SIPName", "demo");
        vars.set("SIPLogsDirectory", format!("{}/logs/", unit.path().display()));
        let ctx = UnitContext {
            uuid: Uuid::new_v4(),
            name: "demo",
            root: unit.path(),
            vars: &vars,
        };
        d.run(&task, ctx)?;
        d.run(&task, ctx)?;
        let log = fs::read_to_string(unit.path().join("logs/out.log"))?;
        assert_eq!("hello demo\nhello demo\n", log);
        Ok(())
    }

    #[test]
    fn test_unwritable_log_runs_nothing() -> Result<()> {
        let state = tempdir()?;
        let unit = tempdir()?;
        let marker = unit.path().join("ran");
        let d = dispatcher(state.path())?;
        let script = format!("-c 'touch {}'", marker.display());
        let mut task = sh_task(Scope::PerUnit, &script)?;
        task.stdout = Some(Template::parse("relative.log")?);

        let vars = Variables::default();
        let ctx = UnitContext {
            uuid: Uuid::new_v4(),
            name: "u",
            root: unit.path(),
            vars: &vars,
        };
        assert!(matches!(d.run(&task, ctx), Err(DispatchError::Other(_))));
        assert!(!marker.exists());
        Ok(())
    }

    #[test]
    fn test_failed_append_keeps_exit_code() -> Result<()> {
        let state = tempdir()?;
        let unit = tempdir()?;
        let d = dispatcher(state.path())?;
        // the log path is taken by a directory, so appending to it fails:
        fs::create_dir_all(unit.path().join("logs/out.log"))?;
        let mut task = sh_task(Scope::PerUnit, "-c 'echo done; exit 3'")?;
        task.stdout = Some(Template::parse("%SIPLogsDirectory%out.log")?);

        let mut vars = Variables::default();
        vars.set("SIPLogsDirectory", format!("{}/logs/", unit.path().display()));
        let ctx = UnitContext {
            uuid: Uuid::new_v4(),
            name: "u",
            root: unit.path(),
            vars: &vars,
        };
        let result = d.run(&task, ctx)?;
        assert_eq!(3, result.exit_code);
        assert_eq!("done\n", result.stdout);
        Ok(())
    }
}
