//! Local user database lookups.

use crate::error::{Error, Result};
use serde::Serialize;
use std::path::{Path, PathBuf};

/// One `/etc/passwd` entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct User {
    pub name: String,
    #[serde(rename = "id")]
    pub uid: u32,
    pub gid: u32,
    pub home: String,
    pub shell: String,
}

/// Parse passwd content. Comments and malformed lines are skipped.
pub fn parse_passwd(text: &str) -> Vec<User> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| {
            let fields: Vec<&str> = line.split(':').collect();
            if fields.len() < 7 {
                return None;
            }
            Some(User {
                name: fields[0].to_string(),
                uid: fields[2].parse().ok()?,
                gid: fields[3].parse().ok()?,
                home: fields[5].to_string(),
                shell: fields[6].to_string(),
            })
        })
        .collect()
}

// Regular users, root, system users, nobody.
fn listing_rank(uid: u32) -> u8 {
    match uid {
        65534 => 3,
        0 => 1,
        1..1000 => 2,
        _ => 0,
    }
}

/// Reader over a passwd file.
#[derive(Debug, Clone)]
pub struct Users {
    passwd: PathBuf,
}

impl Users {
    pub fn new(passwd: impl Into<PathBuf>) -> Self {
        Self {
            passwd: passwd.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.passwd
    }

    /// Look a user up by name.
    pub fn lookup(&self, name: &str) -> Result<User> {
        let text = std::fs::read_to_string(&self.passwd)?;
        parse_passwd(&text)
            .into_iter()
            .find(|user| user.name == name)
            .ok_or_else(|| Error::UserNotFound(name.to_string()))
    }

    /// All users: regular users first, then root, system users and nobody,
    /// by name within each rank.
    pub fn all(&self) -> Result<Vec<User>> {
        let text = std::fs::read_to_string(&self.passwd)?;
        let mut users = parse_passwd(&text);
        users.sort_by(|a, b| {
            listing_rank(a.uid)
                .cmp(&listing_rank(b.uid))
                .then_with(|| a.name.cmp(&b.name))
        });
        Ok(users)
    }

    /// Give `path` to `owner`. An empty owner leaves the path alone.
    pub fn chown(&self, path: &Path, owner: &str) -> Result<()> {
        if owner.is_empty() {
            return Ok(());
        }
        let user = self.lookup(owner)?;
        std::os::unix::fs::chown(path, Some(user.uid), Some(user.gid))?;
        Ok(())
    }
}
