//! Provisioning [Let's Encrypt](https://letsencrypt.org/) certificates for
//! Gandi Simple Hosting instances.
//!
//! Simple Hosting has no native ACME support. This crate bridges the gap for
//! `http-01` challenges by driving two remote surfaces:
//!
//! - the platform's XML-RPC API, for instance lookup and hosted-certificate
//!   upload;
//! - the instance's SFTP file store, for placing the validation file under
//!   `.well-known/acme-challenge/` and patching the shared `.htaccess` so
//!   rewrite rules don't hide it.
//!
//! # Usage
//!
//! [`ShsConfigurator`] implements the two roles a certificate client expects:
//!
//! 1. [`Authenticator::prepare`] resolves the API key and the instance.
//! 2. [`Authenticator::perform`] deploys each pending challenge.
//! 3. The ACME client validates the challenges.
//! 4. [`Authenticator::cleanup`] reverses the deployment, best-effort.
//! 5. [`Installer::deploy_certificate`] uploads the issued certificate.
//!
//! # Failure model
//!
//! The remote file store offers no transactions and signals errors only
//! through the `sftp` exit code. Batches distinguish hard commands (abort the
//! batch on failure) from soft ones (failure is benign, e.g. creating a
//! directory that already exists); deploy records what it created so revoke
//! can remove exactly that, deepest first, without touching anything
//! pre-existing. See [`RemoteShell`].

#![deny(rust_2018_idioms, nonstandard_style, future_incompatible)]

mod challenge;
mod configurator;
mod directory;
mod error;
mod install;
mod key;
mod rpc;
mod session;
mod util;

#[cfg(test)]
mod test;

pub use crate::{
    challenge::{
        ChallengeDeployer, ChallengeKind, ChallengeRecord, ChallengeRevoker, ExclusionOriginal,
        PendingChallenge, HTACCESS_PATCH,
    },
    configurator::{Authenticator, Config, Installer, ShsConfigurator},
    directory::{InstanceDirectory, InstanceInfo, RuntimeType},
    error::{Error, Result},
    install::CertificateInstaller,
    key::ApiKey,
    rpc::{RpcClient, Value, GANDI_API_URL},
    session::{Command, RemoteShell, SftpSession, Verb},
};
