//! Client session: identity pool, transport, batcher and cache
//!
//! One session owns one active identity at a time. Switching identity rebinds
//! the transport credential in place; the batcher queue and cache contents
//! survive the switch (rotation clears the cache explicitly when staleness
//! matters).

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use serde::Deserialize;
use tracing::info;

use crate::api::{DriveClient, RemoteTransport, RequestBatcher};
use crate::cache::NodeCache;

/// A service identity: email plus the bearer token it authenticates with.
/// Token acquisition is an external concern; the credential file carries it.
#[derive(Debug, Clone, Deserialize)]
pub struct Credential {
    pub client_email: String,
    #[serde(default)]
    pub token: String,
}

/// The set of available service identities, ordered by credential file path
/// so that "account N" is reproducible across runs.
pub struct IdentityPool {
    entries: Vec<Credential>,
}

impl IdentityPool {
    /// Load from a single credential file or a directory of `.json` files
    pub fn load(path: &Path) -> Result<Self> {
        let mut files: Vec<PathBuf> = if path.is_dir() {
            fs::read_dir(path)
                .with_context(|| format!("Failed to read secrets directory {}", path.display()))?
                .filter_map(|entry| entry.ok().map(|e| e.path()))
                .filter(|p| {
                    p.extension()
                        .map(|ext| ext.eq_ignore_ascii_case("json"))
                        .unwrap_or(false)
                })
                .collect()
        } else if path.is_file() {
            vec![path.to_path_buf()]
        } else {
            bail!("Secrets file/dir not found: {}", path.display());
        };
        files.sort();

        let mut entries = Vec::new();
        for file in files {
            let raw = fs::read_to_string(&file)
                .with_context(|| format!("Failed to read credential {}", file.display()))?;
            let credential: Credential = serde_json::from_str(&raw)
                .with_context(|| format!("Invalid credential file {}", file.display()))?;
            entries.push(credential);
        }
        if entries.is_empty() {
            bail!("No credential files found in {}", path.display());
        }
        Ok(Self { entries })
    }

    /// Interactive-auth alternative: a single identity from the environment
    pub fn from_env() -> Result<Self> {
        let email = env::var("DRIVE_OAUTH_EMAIL")
            .context("DRIVE_OAUTH_EMAIL is not set (required with --oauth)")?;
        let token = env::var("DRIVE_OAUTH_TOKEN")
            .context("DRIVE_OAUTH_TOKEN is not set (required with --oauth)")?;
        Ok(Self {
            entries: vec![Credential {
                client_email: email,
                token,
            }],
        })
    }

    #[cfg(test)]
    pub(crate) fn from_credentials(entries: Vec<Credential>) -> Self {
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn emails(&self) -> Vec<String> {
        self.entries.iter().map(|c| c.client_email.clone()).collect()
    }

    /// 1-based account index, matching the `--account` flag
    fn get(&self, index: usize) -> Result<&Credential> {
        if index == 0 || index > self.entries.len() {
            bail!(
                "Account index {} out of range (pool has {} identities)",
                index,
                self.entries.len()
            );
        }
        Ok(&self.entries[index - 1])
    }

    fn by_email(&self, email: &str) -> Option<&Credential> {
        self.entries.iter().find(|c| c.client_email == email)
    }
}

/// One client session: the identity pool, the shared transport/batcher and
/// the node cache. Operations take the session explicitly instead of
/// inheriting from it.
pub struct Session {
    pool: IdentityPool,
    transport: Arc<dyn RemoteTransport>,
    pub batcher: Arc<RequestBatcher>,
    pub cache: NodeCache,
    email: String,
}

impl Session {
    pub fn new(pool: IdentityPool, account_index: usize) -> Result<Self> {
        let credential = pool.get(account_index)?;
        let transport: Arc<dyn RemoteTransport> = Arc::new(DriveClient::new(
            &credential.client_email,
            &credential.token,
        )?);
        Self::with_transport(pool, account_index, transport)
    }

    /// Build a session over an arbitrary transport (scripted in tests)
    pub fn with_transport(
        pool: IdentityPool,
        account_index: usize,
        transport: Arc<dyn RemoteTransport>,
    ) -> Result<Self> {
        let credential = pool.get(account_index)?.clone();
        transport.bind_identity(&credential.client_email, &credential.token);
        let batcher = Arc::new(RequestBatcher::new(Arc::clone(&transport)));
        let cache = NodeCache::new(Arc::clone(&batcher));
        info!(email = %credential.client_email, "Using account");
        Ok(Self {
            pool,
            transport,
            batcher,
            cache,
            email: credential.client_email,
        })
    }

    /// Email of the active identity
    pub fn email(&self) -> &str {
        &self.email
    }

    /// All identities in the pool, in pool order
    pub fn accounts(&self) -> Vec<String> {
        self.pool.emails()
    }

    pub fn pool_size(&self) -> usize {
        self.pool.len()
    }

    /// Rebind the transport to another pool identity. Cache contents are not
    /// invalidated; callers clear explicitly when cross-identity staleness
    /// matters.
    pub fn switch_identity(&mut self, email: &str) -> Result<()> {
        let credential = self
            .pool
            .by_email(email)
            .ok_or_else(|| anyhow!("No credential for {} in the pool", email))?;
        self.transport
            .bind_identity(&credential.client_email, &credential.token);
        self.email = credential.client_email.clone();
        info!(email = %self.email, "Using account");
        Ok(())
    }
}
