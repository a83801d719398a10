use std::{
    env,
    path::{Path, PathBuf},
};

/// Home directory of the user who actually invoked us.
///
/// When running under `sudo` (the usual way a certificate client is invoked),
/// `$HOME` points at root's home but the SSH key material and known-hosts
/// file we need live in the invoking user's home. `SUDO_USER` identifies that
/// user.
pub(crate) fn invoking_user_home() -> PathBuf {
    home_of(env::var("SUDO_USER").ok().as_deref(), env::var_os("HOME"))
}

fn home_of(sudo_user: Option<&str>, home: Option<std::ffi::OsString>) -> PathBuf {
    match sudo_user {
        Some("root") => PathBuf::from("/root"),
        Some(user) => Path::new("/home").join(user),
        None => home.map(PathBuf::from).unwrap_or_else(|| PathBuf::from("/root")),
    }
}

/// Environment overrides for child processes, so that a privilege-dropped
/// `sftp` resolves `~` to the invoking user's home.
pub(crate) fn user_environment() -> Vec<(&'static str, String)> {
    let Ok(sudo_user) = env::var("SUDO_USER") else {
        return Vec::new();
    };

    let home = invoking_user_home().display().to_string();

    vec![
        ("HOME", home),
        ("USER", sudo_user.clone()),
        ("USERNAME", sudo_user),
    ]
}
