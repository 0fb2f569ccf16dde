use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use crate::models::server::ServerRecord;

#[derive(Debug)]
pub enum RosterError {
    Unreadable(PathBuf, std::io::Error),
    Empty(PathBuf),
}

impl fmt::Display for RosterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unreadable(path, e) => write!(f, "Could not read roster {}: {}", path.display(), e),
            Self::Empty(path) => write!(f, "Roster {} lists no servers", path.display()),
        }
    }
}

impl std::error::Error for RosterError {}

/// The configured servers, in display order.
#[derive(Debug, Clone, Default)]
pub struct Roster {
    servers: Vec<ServerRecord>,
}

impl Roster {
    pub fn parse(text: &str) -> Self {
        let servers = text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(ServerRecord::new)
            .collect();
        Self { servers }
    }

    pub fn load(path: &Path) -> Result<Self, RosterError> {
        let text = fs::read_to_string(path)
            .map_err(|e| RosterError::Unreadable(path.to_path_buf(), e))?;

        let roster = Self::parse(&text);
        if roster.is_empty() {
            return Err(RosterError::Empty(path.to_path_buf()));
        }
        Ok(roster)
    }

    pub fn len(&self) -> usize {
        self.servers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }

    pub fn servers(&self) -> &[ServerRecord] {
        &self.servers
    }

    pub fn servers_mut(&mut self) -> &mut [ServerRecord] {
        &mut self.servers
    }
}

impl FromIterator<ServerRecord> for Roster {
    fn from_iter<I: IntoIterator<Item = ServerRecord>>(iter: I) -> Self {
        Self { servers: iter.into_iter().collect() }
    }
}
