use std::io::{stderr, stdout, Read, Write};
use std::process::{Command, ExitStatus, Stdio};
use std::thread;

use colored::Colorize;

/// Exit code reported for a job that could not be started or waited on.
pub const EXIT_SPAWN_FAILED: i32 = 127;

/// What a finished subprocess left behind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CmdOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CmdOutput {
    fn spawn_failed(cmd: &Command, e: std::io::Error) -> Self {
        let msg = format!("failed to execute {:?}: {e}\n", cmd.get_program());
        log::warn!("{}", msg.trim_end());
        Self {
            exit_code: EXIT_SPAWN_FAILED,
            stdout: String::new(),
            stderr: msg,
        }
    }
}

/// Run a subprocess to completion, capturing stdout and stderr.
/// If `echo` is set, output is also copied to our own stdout/stderr as it arrives.
/// Based on:
/// <https://stackoverflow.com/questions/66060139/how-to-tee-stdout-stderr-from-a-subprocess-in-rust>
pub fn run_cmd(cmd: &mut Command, echo: bool) -> CmdOutput {
    log::debug!("running {:?} {:?}", cmd.get_program(), cmd.get_args().collect::<Vec<_>>());
    let mut child = match cmd
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
    {
        Ok(child) => child,
        Err(e) => return CmdOutput::spawn_failed(cmd, e),
    };

    let child_out = child.stdout.take();
    let child_err = child.stderr.take();

    let thread_out = thread::spawn(move || match child_out {
        Some(stream) => communicate(stream, echo.then(stdout)),
        None => Ok(Vec::new()),
    });
    let thread_err = thread::spawn(move || match child_err {
        Some(stream) => communicate(stream, echo.then(stderr)),
        None => Ok(Vec::new()),
    });

    let out = join_output(thread_out);
    let err = join_output(thread_err);

    let exit_code = match child.wait() {
        Ok(status) => exit_code(status),
        Err(e) => return CmdOutput::spawn_failed(cmd, e),
    };

    if echo {
        eprintln!("\n{} with exit code {exit_code}.", "Process finished".green());
    }
    CmdOutput {
        exit_code,
        stdout: String::from_utf8_lossy(&out).into_owned(),
        stderr: String::from_utf8_lossy(&err).into_owned(),
    }
}

fn join_output(handle: thread::JoinHandle<std::io::Result<Vec<u8>>>) -> Vec<u8> {
    match handle.join() {
        Ok(Ok(buf)) => buf,
        Ok(Err(e)) => {
            log::warn!("error reading subprocess output: {e}");
            Vec::new()
        }
        Err(_) => {
            log::warn!("subprocess output thread panicked");
            Vec::new()
        }
    }
}

fn communicate<R: Read, W: Write>(mut stream: R, mut output: Option<W>) -> std::io::Result<Vec<u8>> {
    let mut captured = Vec::new();
    let mut buf = [0u8; 1024];
    loop {
        let num_read = stream.read(&mut buf)?;
        if num_read == 0 {
            break;
        }

        let buf = &buf[..num_read];
        captured.extend_from_slice(buf);
        if let Some(output) = output.as_mut() {
            output.write_all(buf)?;
        }
    }

    Ok(captured)
}

/// Exit code, or 128 + signal number for a process killed by a signal.
fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(sig) = status.signal() {
            return 128 + sig;
        }
    }
    EXIT_SPAWN_FAILED
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_capture() {
        let mut cmd = Command::new("/bin/sh");
        cmd.args(["-c", "echo out; echo err >&2; exit 3"]);
        let out = run_cmd(&mut cmd, false);
        assert_eq!(3, out.exit_code);
        assert_eq!("out\n", out.stdout);
        assert_eq!("err\n", out.stderr);
    }

    #[test]
    fn test_spawn_failure() {
        let mut cmd = Command::new("/definitely/not/a/program");
        let out = run_cmd(&mut cmd, false);
        assert_eq!(EXIT_SPAWN_FAILED, out.exit_code);
        assert!(!out.stderr.is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn test_signal() {
        let mut cmd = Command::new("/bin/sh");
        cmd.args(["-c", "kill -9 $$"]);
        assert_eq!(137, run_cmd(&mut cmd, false).exit_code);
    }
}
