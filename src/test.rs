//! Test rig: a canned-response XML-RPC server and an in-memory remote file
//! store.

use std::{
    collections::{BTreeMap, BTreeSet},
    net::TcpListener,
    path::PathBuf,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};

use actix_web::{dev::ServerHandle, web, App, HttpResponse, HttpServer};
use parking_lot::Mutex;

use crate::{
    error::{Error, Result},
    key::ApiKey,
    session::{Command, RemoteShell, Verb},
};

pub(crate) fn api_key() -> ApiKey {
    ApiKey::resolve(Some("TESTKEYTESTKEYTESTKEY123")).unwrap()
}

pub(crate) struct TestRpcServer {
    pub url: String,
    calls: Arc<AtomicUsize>,
    handle: ServerHandle,
}

impl TestRpcServer {
    /// Number of method calls the server has answered.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Drop for TestRpcServer {
    fn drop(&mut self) {
        drop(self.handle.stop(false));
    }
}

fn list_response(id: i64, name: &str) -> String {
    format!(
        "<?xml version=\"1.0\"?><methodResponse><params><param><value><array><data>\
         <value><struct>\
         <member><name>id</name><value><int>{id}</int></value></member>\
         <member><name>name</name><value><string>{name}</string></value></member>\
         </struct></value>\
         </data></array></value></param></params></methodResponse>"
    )
}

fn info_response(id: i64, platform: &str) -> String {
    format!(
        "<?xml version=\"1.0\"?><methodResponse><params><param><value><struct>\
         <member><name>id</name><value><int>{id}</int></value></member>\
         <member><name>type</name><value><string>{platform}</string></value></member>\
         <member><name>user</name><value><string>abc123</string></value></member>\
         <member><name>ftp_server</name><value><string>sftp.dc2.gpaas.net</string></value></member>\
         <member><name>date_start</name><value><dateTime.iso8601>20260101T00:00:00</dateTime.iso8601></value></member>\
         </struct></value></param></params></methodResponse>"
    )
}

const EMPTY_LIST: &str = "<?xml version=\"1.0\"?><methodResponse><params><param>\
    <value><array><data></data></array></value>\
    </param></params></methodResponse>";

const CREATED: &str = "<?xml version=\"1.0\"?><methodResponse><params><param>\
    <value><int>1</int></value>\
    </param></params></methodResponse>";

const FAULT: &str = "<?xml version=\"1.0\"?><methodResponse><fault><value><struct>\
    <member><name>faultCode</name><value><int>510150</int></value></member>\
    <member><name>faultString</name><value><string>Invalid certificate material</string></value></member>\
    </struct></value></fault></methodResponse>";

fn route_call(body: &str) -> String {
    if body.contains("paas.list") {
        if body.contains("no-such-instance") {
            EMPTY_LIST.to_owned()
        } else if body.contains("node-demo") {
            list_response(99001, "node-demo")
        } else {
            list_response(44042, "demo")
        }
    } else if body.contains("paas.info") {
        if body.contains("99001") {
            info_response(99001, "nodejs")
        } else {
            info_response(44042, "phpcgi")
        }
    } else if body.contains("cert.hosted.create") {
        // empty certificate material is rejected
        if body.contains("<string></string>") {
            FAULT.to_owned()
        } else {
            CREATED.to_owned()
        }
    } else {
        FAULT.to_owned()
    }
}

pub(crate) fn with_rpc_server() -> TestRpcServer {
    let _ = env_logger::builder().is_test(true).try_init();

    let lst = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = lst.local_addr().unwrap().port();

    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);

    let server = HttpServer::new(move || {
        let counter = Arc::clone(&counter);

        App::new().route(
            "/xmlrpc",
            web::post().to(move |body: String| {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    HttpResponse::Ok()
                        .content_type("text/xml")
                        .body(route_call(&body))
                }
            }),
        )
    })
    .listen(lst)
    .unwrap()
    .workers(1)
    .run();

    let handle = server.handle();

    tokio::spawn(server);

    TestRpcServer {
        url: format!("http://127.0.0.1:{port}/xmlrpc"),
        calls,
        handle,
    }
}

#[derive(Debug, Default)]
pub(crate) struct RemoteFs {
    pub dirs: BTreeSet<String>,
    pub files: BTreeMap<String, Vec<u8>>,
    /// Local paths handed to `put`, kept for scratch-reclaim assertions.
    pub put_sources: Vec<PathBuf>,
}

#[derive(Debug, Default)]
enum FailPuts {
    #[default]
    No,
    All,
    /// Only puts to this remote name fail.
    Named(String),
}

/// In-memory [`RemoteShell`] recording every command it is asked to run.
#[derive(Debug, Default)]
pub(crate) struct FakeShell {
    pub remote: Mutex<RemoteFs>,
    pub calls: Mutex<Vec<String>>,
    fail_puts: Mutex<FailPuts>,
    refuse_connections: bool,
}

impl FakeShell {
    pub fn refusing_connections(mut self) -> Self {
        self.refuse_connections = true;
        self
    }

    pub fn fail_puts(&self) {
        *self.fail_puts.lock() = FailPuts::All;
    }

    pub fn fail_puts_named(&self, remote: &str) {
        *self.fail_puts.lock() = FailPuts::Named(remote.to_owned());
    }

    pub fn allow_puts(&self) {
        *self.fail_puts.lock() = FailPuts::No;
    }

    pub fn seed_dirs(&self, dirs: &[String]) {
        self.remote.lock().dirs.extend(dirs.iter().cloned());
    }

    pub fn seed_file(&self, path: &str, content: &[u8]) {
        self.remote.lock().files.insert(path.to_owned(), content.to_vec());
    }

    pub fn file(&self, path: &str) -> Option<Vec<u8>> {
        self.remote.lock().files.get(path).cloned()
    }

    pub fn calls_starting_with(&self, prefix: &str) -> Vec<String> {
        self.calls
            .lock()
            .iter()
            .filter(|call| call.starts_with(prefix))
            .cloned()
            .collect()
    }

    fn apply(&self, cwd: &mut String, verb: &Verb) -> std::result::Result<(), ()> {
        let mut fs = self.remote.lock();

        match verb {
            Verb::Cd(path) => {
                let path = resolve(cwd, path);
                if fs.dirs.contains(&path) {
                    *cwd = path;
                    Ok(())
                } else {
                    Err(())
                }
            }

            Verb::MkDir(path) => {
                let path = resolve(cwd, path);
                // creating an existing directory fails, like the real store
                if fs.dirs.insert(path) {
                    Ok(())
                } else {
                    Err(())
                }
            }

            Verb::Put { local, remote } => {
                fs.put_sources.push(local.clone());

                let failing = match &*self.fail_puts.lock() {
                    FailPuts::No => false,
                    FailPuts::All => true,
                    FailPuts::Named(name) => name == remote,
                };
                if failing {
                    return Err(());
                }

                let Ok(content) = std::fs::read(local) else {
                    return Err(());
                };

                let path = resolve(cwd, remote);
                fs.files.insert(path, content);
                Ok(())
            }

            Verb::Get { remote, local } => {
                let path = resolve(cwd, remote);
                match fs.files.get(&path) {
                    Some(content) => std::fs::write(local, content).map_err(|_| ()),
                    None => Err(()),
                }
            }

            Verb::Rm(path) => {
                let path = resolve(cwd, path);
                fs.files.remove(&path).map(|_| ()).ok_or(())
            }

            Verb::RmDir(path) => {
                let path = resolve(cwd, path);

                if !fs.dirs.contains(&path) {
                    return Err(());
                }

                let prefix = format!("{path}/");
                let occupied = fs.files.keys().any(|file| file.starts_with(&prefix))
                    || fs.dirs.iter().any(|dir| dir.starts_with(&prefix));

                if occupied {
                    Err(())
                } else {
                    fs.dirs.remove(&path);
                    Ok(())
                }
            }

            Verb::ChMod { path, .. } => {
                let path = resolve(cwd, path);
                if fs.files.contains_key(&path) {
                    Ok(())
                } else {
                    Err(())
                }
            }
        }
    }
}

/// Paths with a separator are taken as-is; bare names resolve against the
/// batch's working directory.
fn resolve(cwd: &str, path: &str) -> String {
    if cwd.is_empty() || path.contains('/') {
        path.to_owned()
    } else {
        format!("{cwd}/{path}")
    }
}

impl RemoteShell for FakeShell {
    async fn probe(&self, user: &str, host: &str) -> Result<()> {
        self.calls.lock().push(format!("probe {user}@{host}"));

        if self.refuse_connections {
            Err(Error::Connection {
                user: user.to_owned(),
                host: host.to_owned(),
            })
        } else {
            Ok(())
        }
    }

    async fn run_batch(
        &self,
        _user: &str,
        _host: &str,
        what: &str,
        commands: &[Command],
    ) -> Result<()> {
        let mut cwd = String::new();

        for command in commands {
            self.calls.lock().push(command.render());

            match self.apply(&mut cwd, &command.verb) {
                Ok(()) => {}
                Err(()) if command.soft => {}
                Err(()) => return Err(Error::RemoteOperation(what.to_owned())),
            }
        }

        Ok(())
    }
}

#[tokio::test]
async fn test_rpc_server_answers_method_calls() {
    use crate::rpc::{RpcClient, Value};

    let server = with_rpc_server();
    let rpc = RpcClient::new(&server.url).unwrap();

    let list = rpc
        .call("paas.list", &[Value::string(api_key().as_str())])
        .await
        .unwrap();

    assert_eq!(list.as_array().map(<[Value]>::len), Some(1));
    assert_eq!(server.calls(), 1);
}
