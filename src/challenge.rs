//! Challenge file deployment and revocation.
//!
//! Deploying a challenge is a multi-step remote mutation against a file store
//! with no transactions: ensure directories, upload the proof file, patch the
//! shared rewrite-exclusion file. Revoking reverses it. The store's only
//! primitives are individual sftp commands, so idempotency comes from soft
//! commands (create/delete things that may already be in the desired state)
//! and reversibility from recording exactly what deploy created.

use std::io::Write as _;

use tempfile::NamedTempFile;

use crate::{
    error::{Error, Result},
    session::{Command, RemoteShell, Verb},
};

/// Stanza appended to the `.well-known/.htaccess` so rewrite rules don't hide
/// the validation path.
pub const HTACCESS_PATCH: &str = "\n# Patch for Let's Encrypt\nRewriteEngine off\n";

const EXCLUSION_FILE: &str = ".htaccess";
const SCRATCH_SUFFIX: &str = ".letsencrypt.gandi-shs";

/// Challenge kinds this crate can satisfy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChallengeKind {
    Http01,
}

/// A pending http-01 challenge handed over by the ACME client.
///
/// `response` is the client's own validation-response object. This crate
/// never constructs or inspects it; a successful deploy hands it back
/// untouched.
#[derive(Debug)]
pub struct PendingChallenge<R> {
    /// Validation file name.
    pub token: String,
    /// Key authorization string, served as the file body.
    pub proof: String,
    pub response: R,
}

impl<R> PendingChallenge<R> {
    pub fn new(token: impl Into<String>, proof: impl Into<String>, response: R) -> Self {
        PendingChallenge {
            token: token.into(),
            proof: proof.into(),
            response,
        }
    }
}

/// Pre-patch content of the shared exclusion file.
///
/// Captured at most once per run, by the first challenge to patch; later
/// challenges and the revoke step reuse the same capture, since the file is
/// shared across all challenges of one instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExclusionOriginal {
    /// The file did not exist before we patched.
    Absent,
    Present(String),
}

/// What deploy created for one challenge; consumed by the matching revoke.
#[derive(Debug, Clone)]
pub struct ChallengeRecord {
    pub token: String,
    /// Directories ensured for this challenge, shallow-to-deep.
    pub created_dirs: Vec<String>,
}

/// The directories a challenge file needs, shallow-to-deep.
pub(crate) fn challenge_dirs(base_path: &str) -> Vec<String> {
    let base = base_path.trim_end_matches('/');
    vec![
        base.to_owned(),
        format!("{base}/.well-known"),
        format!("{base}/.well-known/acme-challenge"),
    ]
}

fn well_known(base_path: &str) -> String {
    format!("{}/.well-known", base_path.trim_end_matches('/'))
}

/// Writes `content` to a scratch file that is removed when the handle drops,
/// on every exit path.
fn scratch_file(content: &[u8]) -> Result<NamedTempFile> {
    let mut scratch = tempfile::Builder::new().suffix(SCRATCH_SUFFIX).tempfile()?;
    scratch.write_all(content)?;
    scratch.flush()?;
    Ok(scratch)
}

/// Deploys one challenge to an instance's file tree.
pub struct ChallengeDeployer<'a, S> {
    shell: &'a S,
    user: &'a str,
    host: &'a str,
    base_path: &'a str,
}

impl<'a, S: RemoteShell> ChallengeDeployer<'a, S> {
    pub fn new(shell: &'a S, user: &'a str, host: &'a str, base_path: &'a str) -> Self {
        ChallengeDeployer {
            shell,
            user,
            host,
            base_path,
        }
    }

    /// Place the proof file and patch the exclusion file.
    ///
    /// `capture` is the run's exclusion original; when still `None` the
    /// current remote content is fetched and stored there before the patch
    /// upload is attempted, so a failed patch cannot lose the capture.
    /// Returns the record revoke needs.
    pub async fn deploy(
        &self,
        token: &str,
        proof: &str,
        capture: &mut Option<ExclusionOriginal>,
    ) -> Result<ChallengeRecord> {
        log::info!("Deploying challenge {token}");

        // materialize the payload first; the scratch file is reclaimed on
        // every path out of this function
        let scratch = scratch_file(proof.as_bytes())?;

        // fail fast on auth/connectivity before any mutation
        self.shell.probe(self.user, self.host).await?;

        let dirs = challenge_dirs(self.base_path);
        let deepest = dirs[dirs.len() - 1].clone();

        // directory creation is soft: pre-existing directories are fine and
        // stay untouched by the later revoke
        let mut commands = dirs
            .iter()
            .map(|dir| Command::soft(Verb::MkDir(dir.clone())))
            .collect::<Vec<_>>();

        commands.push(Command::hard(Verb::Cd(deepest.clone())));
        commands.push(Command::hard(Verb::Put {
            local: scratch.path().to_owned(),
            remote: token.to_owned(),
        }));
        commands.push(Command::hard(Verb::ChMod {
            mode: 0o444,
            path: token.to_owned(),
        }));

        self.shell
            .run_batch(self.user, self.host, "upload challenge file", &commands)
            .await
            .map_err(|err| match err {
                Error::RemoteOperation(_) => Error::Upload(deepest.clone()),
                other => other,
            })?;

        if capture.is_none() {
            *capture = Some(self.fetch_exclusion().await?);
        }

        let merged = match capture {
            Some(ExclusionOriginal::Present(content)) => format!("{content}{HTACCESS_PATCH}"),
            _ => HTACCESS_PATCH.to_owned(),
        };

        self.upload_exclusion(&merged).await?;

        Ok(ChallengeRecord {
            token: token.to_owned(),
            created_dirs: dirs,
        })
    }

    async fn fetch_exclusion(&self) -> Result<ExclusionOriginal> {
        let scratch = scratch_file(b"")?;

        let commands = [
            Command::hard(Verb::Cd(well_known(self.base_path))),
            // absence of the file is not an error
            Command::soft(Verb::Get {
                remote: EXCLUSION_FILE.to_owned(),
                local: scratch.path().to_owned(),
            }),
        ];

        self.shell
            .run_batch(self.user, self.host, "fetch exclusion file", &commands)
            .await?;

        let content = std::fs::read_to_string(scratch.path())?;

        // a failed get leaves the scratch file empty; an empty exclusion
        // file restores the same way as a missing one
        Ok(if content.is_empty() {
            ExclusionOriginal::Absent
        } else {
            ExclusionOriginal::Present(content)
        })
    }

    async fn upload_exclusion(&self, content: &str) -> Result<()> {
        let scratch = scratch_file(content.as_bytes())?;

        let commands = [
            Command::hard(Verb::Cd(well_known(self.base_path))),
            Command::hard(Verb::Put {
                local: scratch.path().to_owned(),
                remote: EXCLUSION_FILE.to_owned(),
            }),
            Command::hard(Verb::ChMod {
                mode: 0o644,
                path: EXCLUSION_FILE.to_owned(),
            }),
        ];

        self.shell
            .run_batch(self.user, self.host, "patch exclusion file", &commands)
            .await
    }
}

/// Reverses a deployed challenge.
///
/// Revocation is best-effort by design: the certificate's fate is already
/// decided by the time it runs, so callers log failures instead of
/// propagating them.
pub struct ChallengeRevoker<'a, S> {
    shell: &'a S,
    user: &'a str,
    host: &'a str,
    base_path: &'a str,
}

impl<'a, S: RemoteShell> ChallengeRevoker<'a, S> {
    pub fn new(shell: &'a S, user: &'a str, host: &'a str, base_path: &'a str) -> Self {
        ChallengeRevoker {
            shell,
            user,
            host,
            base_path,
        }
    }

    /// Restore the exclusion file, remove the proof file, remove the
    /// directories deploy created (deepest first).
    pub async fn revoke(
        &self,
        record: &ChallengeRecord,
        original: Option<&ExclusionOriginal>,
    ) -> Result<()> {
        log::info!("Revoking challenge {}", record.token);

        self.restore_exclusion(original).await?;

        let Some(deepest) = record.created_dirs.last() else {
            return Ok(());
        };

        let mut commands = vec![Command::hard(Verb::Rm(format!(
            "{deepest}/{}",
            record.token
        )))];

        // deepest first; soft, so directories shared with other challenges
        // or pre-existing ones are silently kept
        for dir in record.created_dirs.iter().rev() {
            commands.push(Command::soft(Verb::RmDir(dir.clone())));
        }

        self.shell
            .run_batch(self.user, self.host, "remove challenge file", &commands)
            .await
    }

    async fn restore_exclusion(&self, original: Option<&ExclusionOriginal>) -> Result<()> {
        match original {
            Some(ExclusionOriginal::Present(content)) => {
                let scratch = scratch_file(content.as_bytes())?;

                let commands = [
                    Command::hard(Verb::Cd(well_known(self.base_path))),
                    Command::hard(Verb::Put {
                        local: scratch.path().to_owned(),
                        remote: EXCLUSION_FILE.to_owned(),
                    }),
                ];

                self.shell
                    .run_batch(self.user, self.host, "restore exclusion file", &commands)
                    .await
            }

            // the file did not exist before we patched, or the capture did
            // not survive to this call: delete-if-present
            Some(ExclusionOriginal::Absent) | None => {
                let commands = [
                    Command::hard(Verb::Cd(well_known(self.base_path))),
                    Command::soft(Verb::Rm(EXCLUSION_FILE.to_owned())),
                ];

                self.shell
                    .run_batch(self.user, self.host, "remove exclusion file", &commands)
                    .await
            }
        }
    }
}
