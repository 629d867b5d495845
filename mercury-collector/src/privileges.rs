//! Working directory and privilege changes.
//!
//! Both run on the main thread before any worker starts: the directory
//! change before any file is opened, the privilege drop after capture
//! sockets are bound.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PrivilegeError {
    #[error("cannot change directory to {path}: {source}")]
    ChangeDirectory {
        path: PathBuf,
        #[source]
        source: nix::Error,
    },

    #[error("unknown user '{0}'")]
    UnknownUser(String),

    #[error("cannot switch to user '{user}': {source}")]
    Switch {
        user: String,
        #[source]
        source: nix::Error,
    },
}

/// Process-wide changes made during startup.
pub trait ProcessControl: Send + Sync {
    fn change_directory(&self, path: &Path) -> Result<(), PrivilegeError>;

    /// Switch group and then user to `user`.
    fn drop_privileges(&self, user: &str) -> Result<(), PrivilegeError>;
}

/// The real process, through `nix`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemProcess;

impl ProcessControl for SystemProcess {
    fn change_directory(&self, path: &Path) -> Result<(), PrivilegeError> {
        nix::unistd::chdir(path).map_err(|source| PrivilegeError::ChangeDirectory {
            path: path.to_path_buf(),
            source,
        })
    }

    fn drop_privileges(&self, user: &str) -> Result<(), PrivilegeError> {
        use nix::unistd::{setgid, setuid, User};

        let switch_error = |source| PrivilegeError::Switch {
            user: user.to_string(),
            source,
        };
        let account = User::from_name(user)
            .map_err(switch_error)?
            .ok_or_else(|| PrivilegeError::UnknownUser(user.to_string()))?;

        #[cfg(target_os = "linux")]
        nix::unistd::setgroups(&[account.gid]).map_err(switch_error)?;
        setgid(account.gid).map_err(switch_error)?;
        setuid(account.uid).map_err(switch_error)?;
        Ok(())
    }
}

/// A process change recorded by [`MockProcess`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessCall {
    ChangeDirectory(PathBuf),
    DropPrivileges(String),
}

/// Records calls instead of changing the process.
#[derive(Debug, Clone, Default)]
pub struct MockProcess {
    calls: Arc<Mutex<Vec<ProcessCall>>>,
    known_users: Option<Vec<String>>,
}

impl MockProcess {
    pub fn new() -> Self {
        Self::default()
    }

    /// Only these users exist; any other name fails with `UnknownUser`.
    pub fn with_users(mut self, users: &[&str]) -> Self {
        self.known_users = Some(users.iter().map(|u| u.to_string()).collect());
        self
    }

    pub fn calls(&self) -> Vec<ProcessCall> {
        self.calls.lock().unwrap().clone()
    }
}

impl ProcessControl for MockProcess {
    fn change_directory(&self, path: &Path) -> Result<(), PrivilegeError> {
        self.calls
            .lock()
            .unwrap()
            .push(ProcessCall::ChangeDirectory(path.to_path_buf()));
        Ok(())
    }

    fn drop_privileges(&self, user: &str) -> Result<(), PrivilegeError> {
        if let Some(known) = &self.known_users {
            if !known.iter().any(|u| u == user) {
                return Err(PrivilegeError::UnknownUser(user.to_string()));
            }
        }
        self.calls
            .lock()
            .unwrap()
            .push(ProcessCall::DropPrivileges(user.to_string()));
        Ok(())
    }
}
