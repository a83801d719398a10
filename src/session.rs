//! Remote command channel to an instance's file store.
//!
//! All remote mutation happens through batches of sftp commands fed to one
//! `sftp -b -` child process per batch. The only failure signal is the
//! process exit code: sftp aborts the batch when a command fails, unless the
//! command is prefixed with `-` (a "soft" command), in which case the failure
//! is ignored and the batch continues. Deploy and revoke lean on that
//! distinction for idempotency, so every command records explicitly whether
//! it is hard or soft.

use std::{fmt, path::PathBuf, process::Stdio};

use tokio::io::AsyncWriteExt as _;

use crate::{
    error::{Error, Result},
    util::{invoking_user_home, user_environment},
};

/// The sftp batch vocabulary this crate uses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verb {
    Cd(String),
    MkDir(String),
    Put { local: PathBuf, remote: String },
    Get { remote: String, local: PathBuf },
    Rm(String),
    RmDir(String),
    ChMod { mode: u32, path: String },
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verb::Cd(path) => write!(f, "cd {path}"),
            Verb::MkDir(path) => write!(f, "mkdir {path}"),
            Verb::Put { local, remote } => write!(f, "put {} {remote}", local.display()),
            Verb::Get { remote, local } => write!(f, "get {remote} {}", local.display()),
            Verb::Rm(path) => write!(f, "rm {path}"),
            Verb::RmDir(path) => write!(f, "rmdir {path}"),
            Verb::ChMod { mode, path } => write!(f, "chmod {mode:o} {path}"),
        }
    }
}

/// One command of a batch, with its failure mode.
///
/// A hard command aborts the rest of the batch on failure; a soft command is
/// used exactly where failure is benign (creating a directory that may exist,
/// deleting a file that may not).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub verb: Verb,
    pub soft: bool,
}

impl Command {
    pub fn hard(verb: Verb) -> Command {
        Command { verb, soft: false }
    }

    pub fn soft(verb: Verb) -> Command {
        Command { verb, soft: true }
    }

    pub(crate) fn render(&self) -> String {
        if self.soft {
            format!("-{}", self.verb)
        } else {
            self.verb.to_string()
        }
    }
}

/// An authenticated command channel to a remote file store.
///
/// Implemented by [`SftpSession`] in production and by an in-memory fake in
/// tests.
#[allow(async_fn_in_trait)]
pub trait RemoteShell {
    /// Open a channel and immediately exit. Verifies reachability and
    /// authentication before any mutation is attempted.
    async fn probe(&self, user: &str, host: &str) -> Result<()>;

    /// Execute `commands` in order over one channel. `what` describes the
    /// batch for error reporting. Succeeds only if the channel closes with a
    /// zero exit status.
    async fn run_batch(&self, user: &str, host: &str, what: &str, commands: &[Command])
        -> Result<()>;
}

/// [`RemoteShell`] over an `sftp` child process.
#[derive(Debug, Clone)]
pub struct SftpSession {
    known_hosts: PathBuf,
}

impl SftpSession {
    /// The known-hosts file is resolved against the invoking user's home, so
    /// that running under `sudo` still finds the right key material.
    pub fn new() -> SftpSession {
        SftpSession {
            known_hosts: invoking_user_home().join(".ssh/known_hosts"),
        }
    }

    /// One channel, one exit code.
    async fn run(&self, user: &str, host: &str, commands: &[Command]) -> Result<bool> {
        let mut script = String::new();
        for command in commands {
            script.push_str(&command.render());
            script.push('\n');
        }
        script.push_str("exit\n");

        log::info!("sftp {user}@{host}");
        log::debug!("batch:\n{script}");

        let mut process = tokio::process::Command::new("sftp");
        process
            .arg("-b")
            .arg("-")
            .arg("-o")
            .arg(format!("UserKnownHostsFile={}", self.known_hosts.display()))
            .arg(format!("{user}@{host}"))
            .stdin(Stdio::piped());

        for (name, value) in user_environment() {
            process.env(name, value);
        }

        let mut child = process.spawn()?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(script.as_bytes()).await?;
            // dropping stdin closes the pipe
        }

        let status = child.wait().await?;
        Ok(status.success())
    }
}

impl Default for SftpSession {
    fn default() -> SftpSession {
        SftpSession::new()
    }
}

impl RemoteShell for SftpSession {
    async fn probe(&self, user: &str, host: &str) -> Result<()> {
        if self.run(user, host, &[]).await? {
            Ok(())
        } else {
            Err(Error::Connection {
                user: user.to_owned(),
                host: host.to_owned(),
            })
        }
    }

    async fn run_batch(
        &self,
        user: &str,
        host: &str,
        what: &str,
        commands: &[Command],
    ) -> Result<()> {
        if self.run(user, host, commands).await? {
            Ok(())
        } else {
            Err(Error::RemoteOperation(what.to_owned()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_batch_lines() {
        let put = Command::hard(Verb::Put {
            local: PathBuf::from("/tmp/scratch"),
            remote: "token".to_owned(),
        });
        assert_eq!(put.render(), "put /tmp/scratch token");

        let get = Command::soft(Verb::Get {
            remote: ".htaccess".to_owned(),
            local: PathBuf::from("/tmp/scratch"),
        });
        assert_eq!(get.render(), "-get .htaccess /tmp/scratch");

        assert_eq!(
            Command::hard(Verb::Cd("vhosts/default".to_owned())).render(),
            "cd vhosts/default"
        );
        assert_eq!(
            Command::soft(Verb::MkDir("vhosts/default/.well-known".to_owned())).render(),
            "-mkdir vhosts/default/.well-known"
        );
        assert_eq!(Command::hard(Verb::Rm("token".to_owned())).render(), "rm token");
        assert_eq!(
            Command::soft(Verb::RmDir("vhosts/default".to_owned())).render(),
            "-rmdir vhosts/default"
        );
    }

    #[test]
    fn renders_chmod_in_octal() {
        let chmod = Command::hard(Verb::ChMod {
            mode: 0o444,
            path: "token".to_owned(),
        });
        assert_eq!(chmod.render(), "chmod 444 token");

        let chmod = Command::hard(Verb::ChMod {
            mode: 0o644,
            path: ".htaccess".to_owned(),
        });
        assert_eq!(chmod.render(), "chmod 644 .htaccess");
    }
}
