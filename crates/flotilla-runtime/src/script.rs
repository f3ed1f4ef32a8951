use crate::communicator::OutputStream;
use crate::RuntimeError;
use flotilla_schema::{ScriptSource, ScriptSpec};
use std::io::{BufRead, BufReader, Read};
use std::path::Path;
use std::process::{Command, Stdio};
use std::sync::mpsc;
use std::thread;

/// Run a trigger script on the host, streaming its output line by line.
///
/// Inline scripts run through `sh -c`, with `args` as positional
/// parameters. Returns the exit code; a script killed by a signal reports -1.
pub fn run_local(
    script: &ScriptSpec,
    cwd: &Path,
    on_line: &mut dyn FnMut(OutputStream, &str),
) -> Result<i32, RuntimeError> {
    let mut cmd = match &script.source {
        ScriptSource::Inline(body) => {
            let mut cmd = Command::new("sh");
            cmd.arg("-c").arg(body).arg("flotilla-trigger");
            cmd
        }
        ScriptSource::Path(path) => Command::new(path),
    };
    cmd.args(&script.args)
        .envs(&script.env)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    tracing::debug!("running local script: {cmd:?}");
    let mut child = cmd
        .spawn()
        .map_err(|e| RuntimeError::ExecFailed(format!("failed to start script: {e}")))?;

    let (tx, rx) = mpsc::channel();
    let mut readers = Vec::new();
    if let Some(stdout) = child.stdout.take() {
        readers.push(forward_lines(stdout, OutputStream::Stdout, tx.clone()));
    }
    if let Some(stderr) = child.stderr.take() {
        readers.push(forward_lines(stderr, OutputStream::Stderr, tx.clone()));
    }
    drop(tx);

    for (stream, line) in rx {
        on_line(stream, &line);
    }
    for reader in readers {
        let _ = reader.join();
    }

    let status = child.wait()?;
    Ok(status.code().unwrap_or(-1))
}

fn forward_lines(
    source: impl Read + Send + 'static,
    stream: OutputStream,
    tx: mpsc::Sender<(OutputStream, String)>,
) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        for line in BufReader::new(source).lines() {
            let Ok(line) = line else { break };
            if tx.send((stream, line)).is_err() {
                break;
            }
        }
    })
}
