//! The plugin facade: one configurator filling both roles the certificate
//! client expects, authenticator (prove control of the domain) and installer
//! (put the issued certificate into service).
//!
//! Challenges are processed strictly one at a time: the exclusion file and
//! the directory tree are shared across all challenges of an instance and
//! the remote store has no locking primitive.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
};

use crate::{
    challenge::{
        challenge_dirs, ChallengeDeployer, ChallengeKind, ChallengeRecord, ChallengeRevoker,
        ExclusionOriginal, PendingChallenge,
    },
    directory::{InstanceDirectory, InstanceInfo},
    error::{Error, Result},
    install::CertificateInstaller,
    key::ApiKey,
    rpc::{RpcClient, GANDI_API_URL},
    session::{RemoteShell, SftpSession},
};

/// Run configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Explicit API key; when `None`, the environment and the gandi CLI
    /// config are consulted.
    pub api_key: Option<String>,
    /// Hosting instance name.
    pub instance_name: String,
    /// Virtual host label; selects the document root on php instances.
    pub vhost: String,
}

impl Config {
    pub fn new(instance_name: impl Into<String>) -> Config {
        Config {
            api_key: None,
            instance_name: instance_name.into(),
            vhost: "default".to_owned(),
        }
    }
}

/// The authenticator role: prove control of a domain by placing files on the
/// instance.
#[allow(async_fn_in_trait)]
pub trait Authenticator {
    /// Challenge kinds this authenticator can satisfy, in preference order.
    fn challenge_preferences(&self) -> Vec<ChallengeKind>;

    /// Resolve credentials and the target instance. Fails before any remote
    /// mutation when the configuration is unusable.
    async fn prepare(&mut self) -> Result<()>;

    /// Deploy every pending challenge, collecting one result per challenge;
    /// a failed challenge does not abort the others.
    async fn perform<R>(&mut self, challenges: Vec<PendingChallenge<R>>) -> Vec<Result<R>>;

    /// Best-effort reversal of previously deployed challenges. Never fails:
    /// by this point the certificate's fate is already decided.
    async fn cleanup<R>(&mut self, challenges: &[PendingChallenge<R>]);
}

/// The installer role: put an issued certificate into service.
#[allow(async_fn_in_trait)]
pub trait Installer {
    /// Names this installer can deploy certificates for.
    fn get_all_names(&self) -> Vec<String>;

    async fn deploy_certificate(
        &mut self,
        domain: &str,
        cert_path: &Path,
        key_path: &Path,
        chain_path: Option<&Path>,
        fullchain_path: Option<&Path>,
    ) -> Result<()>;

    /// The platform offers no enhancements; always fails.
    async fn enhance(&mut self, domain: &str, enhancement: &str) -> Result<()>;

    fn supported_enhancements(&self) -> Vec<&'static str>;

    fn save(&mut self, title: Option<&str>, temporary: bool) -> Result<()>;

    fn rollback_checkpoints(&mut self, rollback: u32) -> Result<()>;

    /// Pending configuration changes since the last checkpoint.
    fn view_config_changes(&self) -> Result<String>;

    /// Certificate/key/path triples this installer already manages.
    fn get_all_certs_keys(&self) -> Vec<(PathBuf, PathBuf, PathBuf)>;

    fn recovery_routine(&mut self) -> Result<()>;

    fn config_test(&self) -> Result<()>;

    async fn restart(&mut self) -> Result<()>;
}

/// Authenticator and installer for one hosting instance.
///
/// Holds the state one run accumulates: the resolved API key and instance
/// (looked up once, in [`Authenticator::prepare`]), the exclusion-file
/// original captured by the first deployed challenge, and a record per
/// deployed challenge for the matching cleanup.
pub struct ShsConfigurator<S = SftpSession> {
    config: Config,
    shell: S,
    directory: InstanceDirectory,
    installer: CertificateInstaller,
    api_key: Option<ApiKey>,
    instance: Option<InstanceInfo>,
    exclusion_original: Option<ExclusionOriginal>,
    records: HashMap<String, ChallengeRecord>,
}

impl ShsConfigurator<SftpSession> {
    pub fn new(config: Config) -> Result<ShsConfigurator> {
        Ok(Self::with_parts(
            config,
            RpcClient::new(GANDI_API_URL)?,
            SftpSession::new(),
        ))
    }
}

impl<S: RemoteShell> ShsConfigurator<S> {
    /// Assemble from explicit parts. Tests point the RPC client at a local
    /// server and swap in a fake shell.
    pub fn with_parts(config: Config, rpc: RpcClient, shell: S) -> ShsConfigurator<S> {
        ShsConfigurator {
            directory: InstanceDirectory::new(rpc.clone()),
            installer: CertificateInstaller::new(rpc),
            config,
            shell,
            api_key: None,
            instance: None,
            exclusion_original: None,
            records: HashMap::new(),
        }
    }

    /// Human-readable description of what this configurator does.
    pub fn more_info(&self) -> &'static str {
        "Configures Gandi Simple Hosting to authenticate and install HTTPS."
    }

    fn api_key(&self) -> Result<&ApiKey> {
        self.api_key
            .as_ref()
            .ok_or_else(|| Error::Config("api key not resolved; call prepare() first".into()))
    }

    fn instance(&self) -> Result<&InstanceInfo> {
        self.instance
            .as_ref()
            .ok_or_else(|| Error::Config("instance not resolved; call prepare() first".into()))
    }

    async fn perform_single<R>(&mut self, challenge: PendingChallenge<R>) -> Result<R> {
        let instance = self.instance()?.clone();
        let base_path = instance.runtime.base_path(&self.config.vhost);

        let deployer = ChallengeDeployer::new(
            &self.shell,
            &instance.remote_user,
            &instance.remote_host,
            &base_path,
        );

        // the first challenge's capture is shared by the whole run; deploy
        // stores it even when the patch upload itself fails, so cleanup can
        // still restore the file
        let record = deployer
            .deploy(
                &challenge.token,
                &challenge.proof,
                &mut self.exclusion_original,
            )
            .await?;

        self.records.insert(record.token.clone(), record);

        Ok(challenge.response)
    }

    async fn revoke_single(&mut self, token: &str) -> Result<()> {
        let instance = self.instance()?.clone();
        let base_path = instance.runtime.base_path(&self.config.vhost);

        // deploy state may not have survived until cleanup; the directory
        // list is deterministic, so fall back to recomputing it
        let record = self.records.remove(token).unwrap_or_else(|| ChallengeRecord {
            token: token.to_owned(),
            created_dirs: challenge_dirs(&base_path),
        });

        let revoker = ChallengeRevoker::new(
            &self.shell,
            &instance.remote_user,
            &instance.remote_host,
            &base_path,
        );

        revoker.revoke(&record, self.exclusion_original.as_ref()).await
    }
}

impl<S: RemoteShell> Authenticator for ShsConfigurator<S> {
    fn challenge_preferences(&self) -> Vec<ChallengeKind> {
        vec![ChallengeKind::Http01]
    }

    async fn prepare(&mut self) -> Result<()> {
        let api_key = ApiKey::resolve(self.config.api_key.as_deref())?;

        if self.config.instance_name.is_empty() {
            return Err(Error::Config(
                "a simple hosting instance name is required".into(),
            ));
        }

        // the run's single lookup round-trip; also rejects unsupported
        // runtimes before anything is mutated
        let instance = self
            .directory
            .resolve(&api_key, &self.config.instance_name)
            .await?;

        self.api_key = Some(api_key);
        self.instance = Some(instance);

        Ok(())
    }

    async fn perform<R>(&mut self, challenges: Vec<PendingChallenge<R>>) -> Vec<Result<R>> {
        let mut responses = Vec::with_capacity(challenges.len());

        for challenge in challenges {
            let token = challenge.token.clone();
            let response = self.perform_single(challenge).await;

            if let Err(err) = &response {
                log::warn!("Challenge {token} failed: {err}");
            }

            responses.push(response);
        }

        responses
    }

    async fn cleanup<R>(&mut self, challenges: &[PendingChallenge<R>]) {
        for challenge in challenges {
            if let Err(err) = self.revoke_single(&challenge.token).await {
                log::warn!("Cleanup of challenge {} failed: {err}", challenge.token);
            }
        }
    }
}

impl<S: RemoteShell> Installer for ShsConfigurator<S> {
    fn get_all_names(&self) -> Vec<String> {
        vec![self.config.vhost.clone()]
    }

    async fn deploy_certificate(
        &mut self,
        domain: &str,
        cert_path: &Path,
        key_path: &Path,
        _chain_path: Option<&Path>,
        _fullchain_path: Option<&Path>,
    ) -> Result<()> {
        let api_key = self.api_key()?.clone();

        let certificate = tokio::fs::read_to_string(cert_path).await?;
        let private_key = tokio::fs::read_to_string(key_path).await?;

        log::info!("Installing certificate for {domain}");

        self.installer.deploy(&api_key, &certificate, &private_key).await
    }

    async fn enhance(&mut self, _domain: &str, enhancement: &str) -> Result<()> {
        Err(Error::Config(format!("unsupported enhancement: {enhancement}")))
    }

    fn supported_enhancements(&self) -> Vec<&'static str> {
        Vec::new()
    }

    // the platform has no local configuration files to checkpoint, so the
    // checkpoint machinery has nothing to do
    fn save(&mut self, _title: Option<&str>, _temporary: bool) -> Result<()> {
        Ok(())
    }

    fn rollback_checkpoints(&mut self, _rollback: u32) -> Result<()> {
        Ok(())
    }

    fn view_config_changes(&self) -> Result<String> {
        Ok(String::new())
    }

    // uploaded certificates live on the platform, not on local disk
    fn get_all_certs_keys(&self) -> Vec<(PathBuf, PathBuf, PathBuf)> {
        Vec::new()
    }

    fn recovery_routine(&mut self) -> Result<()> {
        Ok(())
    }

    fn config_test(&self) -> Result<()> {
        Ok(())
    }

    /// No restart exists for the web accelerator.
    async fn restart(&mut self) -> Result<()> {
        Ok(())
    }
}
