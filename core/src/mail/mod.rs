/*
 * mod.rs
 * Copyright (C) 2026 Chris Burdess
 *
 * This file is part of Magma, a multi-protocol mail server.
 *
 * Magma is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * Magma is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with Magma.  If not, see <http://www.gnu.org/licenses/>.
 */

//! Message body storage. Bodies are plain files fanned out under
//! `<root>/<server>/d4/d3/d2/d1/<messagenum>`, where each level divides
//! the message number by another power of 32768. Deletion is always
//! database row first, then unlink.

use std::path::{Path, PathBuf};

use crate::storage::MetaSource;

/// Fan-out divisor for each directory level.
const LEVEL: u64 = 32_768;

/// Mail storage error.
#[derive(Debug)]
pub struct MailError {
    pub message: String,
}

impl MailError {
    fn new(msg: impl Into<String>) -> Self {
        Self { message: msg.into() }
    }
}

impl std::fmt::Display for MailError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for MailError {}

impl From<std::io::Error> for MailError {
    fn from(e: std::io::Error) -> Self {
        Self::new(e.to_string())
    }
}

/// Directory holding a message, without the message file itself.
fn message_dir(root: &Path, server: &str, number: u64) -> PathBuf {
    root.join(server)
        .join((number / LEVEL / LEVEL / LEVEL / LEVEL).to_string())
        .join((number / LEVEL / LEVEL / LEVEL).to_string())
        .join((number / LEVEL / LEVEL).to_string())
        .join((number / LEVEL).to_string())
}

/// Full path of a stored message body.
pub fn message_path(root: &Path, server: &str, number: u64) -> PathBuf {
    message_dir(root, server, number).join(number.to_string())
}

/// Make sure the fan-out directories for a message exist. The
/// `<root>/<server>` base must already be present; missing storage
/// roots indicate a deployment problem rather than a fresh path.
pub async fn ensure_directory(root: &Path, server: &str, number: u64) -> Result<(), MailError> {
    if number == 0 {
        return Err(MailError::new("message numbers start at one"));
    }
    let base = root.join(server);
    if !tokio::fs::try_exists(&base).await? {
        return Err(MailError::new(format!(
            "storage base {} does not exist",
            base.display()
        )));
    }
    tokio::fs::create_dir_all(message_dir(root, server, number)).await?;
    Ok(())
}

/// Write a message body to its storage path.
pub async fn store_message(
    root: &Path,
    server: &str,
    number: u64,
    data: &[u8],
) -> Result<(), MailError> {
    ensure_directory(root, server, number).await?;
    tokio::fs::write(message_path(root, server, number), data).await?;
    Ok(())
}

/// Read a message body.
pub async fn load_message(root: &Path, server: &str, number: u64) -> Result<Vec<u8>, MailError> {
    Ok(tokio::fs::read(message_path(root, server, number)).await?)
}

/// Remove a message: the database row goes first, and only a confirmed
/// row deletion unlinks the body file.
pub async fn remove_message(
    source: &dyn MetaSource,
    root: &Path,
    server: &str,
    usernum: u64,
    messagenum: u64,
) -> Result<bool, MailError> {
    let removed = source
        .delete_message(usernum, messagenum)
        .await
        .map_err(|e| MailError::new(e.message))?;
    if !removed {
        return Ok(false);
    }
    match tokio::fs::remove_file(message_path(root, server, messagenum)).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::warn!(messagenum, "message row deleted but its body file was already gone");
            Ok(true)
        }
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{MemorySource, MetaSource};
    use crate::meta::MetaMessage;

    #[test]
    fn paths_fan_out_by_divisor() {
        let root = Path::new("/var/spool/magma");
        let path = message_path(root, "local", 1);
        assert_eq!(path, Path::new("/var/spool/magma/local/0/0/0/0/1"));

        let number = 32_768u64 * 32_768 * 3 + 32_768 * 2 + 1;
        let path = message_path(root, "local", number);
        assert_eq!(
            path,
            Path::new("/var/spool/magma/local/0/0/3/98306").join(number.to_string())
        );
    }

    #[tokio::test]
    async fn store_and_load_round_trip() {
        let root = std::env::temp_dir().join(format!("magma-mail-{}", std::process::id()));
        tokio::fs::create_dir_all(root.join("local")).await.unwrap();

        store_message(&root, "local", 77, b"Subject: hi\r\n\r\nbody").await.unwrap();
        let body = load_message(&root, "local", 77).await.unwrap();
        assert_eq!(body, b"Subject: hi\r\n\r\nbody");

        tokio::fs::remove_dir_all(&root).await.unwrap();
    }

    #[tokio::test]
    async fn missing_base_is_an_error() {
        let root = std::env::temp_dir().join("magma-mail-missing-base");
        let err = store_message(&root, "nosuch", 1, b"x").await.unwrap_err();
        assert!(err.message.contains("does not exist"));
    }

    #[tokio::test]
    async fn remove_deletes_row_before_file() {
        let root = std::env::temp_dir().join(format!("magma-mail-rm-{}", std::process::id()));
        tokio::fs::create_dir_all(root.join("local")).await.unwrap();

        let source = MemorySource::new();
        source.seed_message(
            42,
            MetaMessage {
                messagenum: 5,
                foldernum: 1,
                server: "local".into(),
                status: 0,
                size: 1,
                signature_num: 0,
                signature_key: 0,
                created: 0,
                tags: Vec::new(),
            },
        );
        store_message(&root, "local", 5, b"x").await.unwrap();

        assert!(remove_message(&source, &root, "local", 42, 5).await.unwrap());
        assert!(source.messages(42).await.unwrap().is_empty());
        assert!(!tokio::fs::try_exists(message_path(&root, "local", 5)).await.unwrap());

        // A second removal finds no row and touches nothing.
        assert!(!remove_message(&source, &root, "local", 42, 5).await.unwrap());

        tokio::fs::remove_dir_all(&root).await.unwrap();
    }
}
