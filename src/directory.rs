//! Hosting-instance lookup.
//!
//! A human-supplied instance name resolves, through two API calls, to the
//! SFTP coordinates and runtime type needed to target the right file tree.

use std::collections::BTreeMap;

use crate::{
    error::{Error, Result},
    key::ApiKey,
    rpc::{RpcClient, Value},
};

/// Runtime platform of a hosting instance.
///
/// The platform field on the API side is a product string (`phpcgi`,
/// `python2`, …); anything whose prefix is not one of these three variants
/// is rejected at resolution time, before any remote mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeType {
    Php,
    Python,
    Ruby,
}

impl RuntimeType {
    fn from_platform(platform: &str) -> Option<RuntimeType> {
        if platform.starts_with("php") {
            Some(RuntimeType::Php)
        } else if platform.starts_with("python") {
            Some(RuntimeType::Python)
        } else if platform.starts_with("ruby") {
            Some(RuntimeType::Ruby)
        } else {
            None
        }
    }

    /// Document root for challenge files, relative to the SFTP login
    /// directory.
    ///
    /// Only php instances serve per-vhost document roots; python and ruby
    /// instances serve a fixed tree.
    pub fn base_path(&self, vhost: &str) -> String {
        match self {
            RuntimeType::Php => format!("vhosts/{vhost}/htdocs/"),
            RuntimeType::Python => "vhosts/default".to_owned(),
            RuntimeType::Ruby => "vhosts/default/public".to_owned(),
        }
    }
}

/// Connection coordinates and runtime type of a resolved instance.
#[derive(Debug, Clone)]
pub struct InstanceInfo {
    pub id: i64,
    pub runtime: RuntimeType,
    pub remote_user: String,
    pub remote_host: String,
}

/// Resolves instance names against the API.
#[derive(Debug, Clone)]
pub struct InstanceDirectory {
    rpc: RpcClient,
}

impl InstanceDirectory {
    pub fn new(rpc: RpcClient) -> InstanceDirectory {
        InstanceDirectory { rpc }
    }

    /// Look up `name`: enumerate matching instances, then fetch the detail
    /// record for the first match.
    ///
    /// Callers cache the result; this is the run's single lookup round-trip.
    pub async fn resolve(&self, key: &ApiKey, name: &str) -> Result<InstanceInfo> {
        let filter = Value::Struct(BTreeMap::from([(
            "name".to_owned(),
            Value::string(name),
        )]));

        let list = self
            .rpc
            .call("paas.list", &[Value::string(key.as_str()), filter])
            .await?;

        let Some(first) = list.as_array().and_then(<[Value]>::first) else {
            return Err(Error::NotFound(name.to_owned()));
        };

        let id = first
            .get("id")
            .and_then(Value::as_i64)
            .ok_or_else(|| Error::RpcProtocol("paas.list entry without id".into()))?;

        let info = self
            .rpc
            .call("paas.info", &[Value::string(key.as_str()), Value::Int(id)])
            .await?;

        let platform = info
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::RpcProtocol("paas.info without type".into()))?;

        let runtime = RuntimeType::from_platform(platform)
            .ok_or_else(|| Error::UnsupportedRuntime(platform.to_owned()))?;

        let remote_user = info
            .get("user")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::RpcProtocol("paas.info without user".into()))?
            .to_owned();

        let remote_host = info
            .get("ftp_server")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::RpcProtocol("paas.info without ftp_server".into()))?
            .to_owned();

        log::info!("Resolved instance {name} to {remote_user}@{remote_host} ({platform})");

        Ok(InstanceInfo {
            id,
            runtime,
            remote_user,
            remote_host,
        })
    }
}
