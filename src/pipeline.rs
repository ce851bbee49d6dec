//! Launching external tools, either alone or chained through pipes.
//!
//! A [`Pipeline`] is an ordered list of [`Stage`] descriptors. The first stage
//! inherits the caller's stdin, every following stage reads the previous
//! stage's stdout and the last stage writes to the caller's stdout. Stderr of
//! every stage goes straight to the caller's stderr.

use std::{
    ffi::{OsStr, OsString},
    fmt,
    io::{self, Write},
    process::{Child, Command, ExitStatus, Stdio},
    thread,
};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("failed to launch {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("{program} exited with {status}")]
    Exit { program: String, status: ExitStatus },
    #[error("failed to wait for {program}: {source}")]
    Wait {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to feed standard input of {program}: {source}")]
    Input {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("pipeline has no stages")]
    Empty,
}

/// One external command: the program and its arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stage {
    program: OsString,
    args: Vec<OsString>,
}

impl Stage {
    pub fn new<S: AsRef<OsStr>>(program: S) -> Self {
        Self {
            program: program.as_ref().to_os_string(),
            args: Vec::new(),
        }
    }

    pub fn arg<S: AsRef<OsStr>>(mut self, arg: S) -> Self {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.args
            .extend(args.into_iter().map(|a| a.as_ref().to_os_string()));
        self
    }

    pub fn program(&self) -> &OsStr {
        &self.program
    }

    /// Arguments as lossy strings, handy for assertions and logging.
    pub fn argv(&self) -> Vec<String> {
        self.args
            .iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }

    fn name(&self) -> String {
        self.program.to_string_lossy().into_owned()
    }

    fn command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command.args(&self.args);
        command
    }

    /// Run to completion with inherited stdio.
    pub fn run(&self) -> Result<(), ToolError> {
        tracing::info!("{self}");
        let status = self
            .command()
            .status()
            .map_err(|source| ToolError::Spawn {
                program: self.name(),
                source,
            })?;
        check_status(self, status)
    }

    /// Run to completion, writing `input` to the process' stdin.
    ///
    /// The input is written from a helper thread while this thread waits on
    /// the child. A child that exits without reading its stdin produces a
    /// broken pipe on the writer; that is ignored and the exit status decides.
    pub fn run_with_input(&self, input: Vec<u8>) -> Result<(), ToolError> {
        tracing::info!("{self}");
        let mut child = self
            .command()
            .stdin(Stdio::piped())
            .spawn()
            .map_err(|source| ToolError::Spawn {
                program: self.name(),
                source,
            })?;

        let stdin = child.stdin.take();
        let writer = thread::spawn(move || -> io::Result<()> {
            if let Some(mut stdin) = stdin {
                stdin.write_all(&input)?;
                stdin.flush()?;
            }
            Ok(())
        });

        let status = child.wait().map_err(|source| ToolError::Wait {
            program: self.name(),
            source,
        })?;

        match writer.join() {
            Ok(Err(err)) if err.kind() != io::ErrorKind::BrokenPipe => {
                check_status(self, status)?;
                return Err(ToolError::Input {
                    program: self.name(),
                    source: err,
                });
            }
            Err(_) => {
                check_status(self, status)?;
                return Err(ToolError::Input {
                    program: self.name(),
                    source: io::Error::other("stdin writer panicked"),
                });
            }
            _ => {}
        }

        check_status(self, status)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.to_string_lossy())?;
        for arg in &self.args {
            write!(f, " {}", arg.to_string_lossy())?;
        }
        Ok(())
    }
}

fn check_status(stage: &Stage, status: ExitStatus) -> Result<(), ToolError> {
    if status.success() {
        Ok(())
    } else {
        Err(ToolError::Exit {
            program: stage.name(),
            status,
        })
    }
}

/// Stages connected stdout-to-stdin, in order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Pipeline {
    stages: Vec<Stage>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, stage: Stage) {
        self.stages.push(stage);
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// Launch every stage and wait for all of them.
    ///
    /// A failure of the last stage is reported in preference to upstream
    /// failures, since upstream stages usually die of a broken pipe once the
    /// consumer is gone. Otherwise the first failing stage in chain order is
    /// reported.
    pub fn run(&self) -> Result<(), ToolError> {
        let Some(last_index) = self.stages.len().checked_sub(1) else {
            return Err(ToolError::Empty);
        };

        let mut children: Vec<(&Stage, Child)> = Vec::with_capacity(self.stages.len());
        let mut upstream: Option<Stdio> = None;

        for (index, stage) in self.stages.iter().enumerate() {
            let is_last = index == last_index;
            if is_last {
                tracing::info!("{stage}");
            } else {
                tracing::info!("{stage} |");
            }

            let mut command = stage.command();
            if let Some(input) = upstream.take() {
                command.stdin(input);
            }
            if !is_last {
                command.stdout(Stdio::piped());
            }

            let mut child = match command.spawn() {
                Ok(child) => child,
                Err(source) => {
                    // Upstream stages see a broken pipe once the read end
                    // held by the command is dropped; reap them before
                    // bailing out.
                    drop(command);
                    reap(children);
                    return Err(ToolError::Spawn {
                        program: stage.name(),
                        source,
                    });
                }
            };

            if !is_last {
                upstream = child.stdout.take().map(Stdio::from);
            }
            children.push((stage, child));
        }

        let exits = wait_all(&mut children)?;
        let statuses: Vec<(&Stage, ExitStatus)> = children
            .iter()
            .map(|(stage, _)| *stage)
            .zip(exits)
            .collect();

        if let Some((stage, status)) = statuses.last()
            && !status.success()
        {
            return check_status(stage, *status);
        }
        for (stage, status) in statuses {
            check_status(stage, status)?;
        }
        Ok(())
    }
}

/// Wait on every child, last stage first. A wait error is reported only after
/// all the other children have been waited on.
fn wait_all(children: &mut [(&Stage, Child)]) -> Result<Vec<ExitStatus>, ToolError> {
    let mut statuses = Vec::with_capacity(children.len());
    let mut failure = None;
    for (stage, child) in children.iter_mut().rev() {
        match child.wait() {
            Ok(status) => {
                tracing::debug!("{} finished with {status}", stage.name());
                statuses.push(status);
            }
            Err(source) => {
                if failure.is_none() {
                    failure = Some(ToolError::Wait {
                        program: stage.name(),
                        source,
                    });
                }
            }
        }
    }
    if let Some(err) = failure {
        return Err(err);
    }
    statuses.reverse();
    Ok(statuses)
}

fn reap(mut children: Vec<(&Stage, Child)>) {
    if let Err(err) = wait_all(&mut children) {
        tracing::warn!("failed to reap: {err}");
    }
}

impl FromIterator<Stage> for Pipeline {
    fn from_iter<I: IntoIterator<Item = Stage>>(iter: I) -> Self {
        Self {
            stages: iter.into_iter().collect(),
        }
    }
}
