//! Hosted-certificate upload.

use std::collections::BTreeMap;

use crate::{
    error::{Error, Result},
    key::ApiKey,
    rpc::{RpcClient, Value},
};

/// Uploads a finished certificate/key pair to the account's
/// hosted-certificate registry.
#[derive(Debug, Clone)]
pub struct CertificateInstaller {
    rpc: RpcClient,
}

impl CertificateInstaller {
    pub fn new(rpc: RpcClient) -> CertificateInstaller {
        CertificateInstaller { rpc }
    }

    /// One RPC call, one attempt; failures surface verbatim.
    pub async fn deploy(&self, key: &ApiKey, certificate_pem: &str, private_key_pem: &str) -> Result<()> {
        let material = Value::Struct(BTreeMap::from([
            ("key".to_owned(), Value::string(private_key_pem)),
            ("crt".to_owned(), Value::string(certificate_pem)),
        ]));

        self.rpc
            .call("cert.hosted.create", &[Value::string(key.as_str()), material])
            .await
            .map_err(|err| match err {
                Error::RpcFault { code, message } => {
                    Error::Install(format!("api fault {code}: {message}"))
                }
                other => other,
            })?;

        log::info!("Hosted certificate created");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn uploads_certificate_material() {
        let server = crate::test::with_rpc_server();
        let installer = CertificateInstaller::new(RpcClient::new(&server.url).unwrap());
        let key = crate::test::api_key();

        installer
            .deploy(&key, "CERT PEM", "KEY PEM")
            .await
            .unwrap();

        assert_eq!(server.calls(), 1);
    }

    #[tokio::test]
    async fn api_fault_surfaces_as_install_error() {
        let server = crate::test::with_rpc_server();
        let installer = CertificateInstaller::new(RpcClient::new(&server.url).unwrap());
        let key = crate::test::api_key();

        // the canned server faults on an empty crt
        match installer.deploy(&key, "", "KEY PEM").await {
            Err(Error::Install(message)) => assert!(message.contains("fault")),
            other => panic!("expected Install error, got {other:?}"),
        }
    }
}
