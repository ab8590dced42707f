//! High level operations against one of the two daemons.
//!
//! A [BirdManager] is bound to an address family, and thereby to one
//! control socket. Configuration changes go through a two step workflow:
//! the uploaded file is stored, checked by the daemon, and only activated
//! if the check passed. After a successful activation the per family
//! `latest` alias is moved to the new file.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::{
    fmt, io,
    path::{Path, PathBuf},
    str::FromStr,
};

use crate::{
    secure_filename, Client, Command, Error, FsStorage, Outcome, PeerSession, ProxyConfig,
    Result, RouteQuery, ShowProtocolsAll, Storage, Transport, APPLY_CONFIG, SHOW_ROUTE,
    VALIDATE_CONFIG,
};

/// Used when nothing of the uploaded name survives [secure_filename]
const FALLBACK_FILENAME: &str = "bird.conf";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AddressFamily {
    Ipv4,
    Ipv6,
}

impl AddressFamily {
    /// Name of the alias pointing at the last applied config of this family
    pub fn latest_alias_name(&self) -> String {
        format!("bird-{}-latest.conf", self)
    }
}

impl fmt::Display for AddressFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AddressFamily::Ipv4 => "ipv4",
            AddressFamily::Ipv6 => "ipv6",
        })
    }
}

impl FromStr for AddressFamily {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "ipv4" => Ok(AddressFamily::Ipv4),
            "ipv6" => Ok(AddressFamily::Ipv6),
            _ => Err(Error::InvalidAddressFamily(s.to_owned())),
        }
    }
}

/// A configuration file as uploaded by the user
#[derive(Debug, Clone)]
pub struct ConfigUpload {
    /// Name given by the uploader, sanitized before use
    pub filename: String,
    pub content: Vec<u8>,
}

impl ConfigUpload {
    pub fn new(filename: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        ConfigUpload {
            filename: filename.into(),
            content: content.into(),
        }
    }
}

pub struct BirdManager<S: Storage = FsStorage> {
    family: AddressFamily,
    client: Client,
    storage: S,
}

impl BirdManager<FsStorage> {
    /// Creates a manager for `ip_version` (`ipv4` or `ipv6`), storing
    /// uploads in the configured folder
    pub fn new(ip_version: &str, config: &ProxyConfig) -> Result<Self> {
        let family = ip_version.parse()?;
        Ok(Self::with_storage(
            family,
            config,
            FsStorage::new(&config.config_folder),
        ))
    }
}

impl<S: Storage> BirdManager<S> {
    pub fn with_storage(family: AddressFamily, config: &ProxyConfig, storage: S) -> Self {
        let client =
            Client::for_endpoint(config.endpoint(family).clone()).with_timeout(config.timeout());
        BirdManager {
            family,
            client,
            storage,
        }
    }

    pub fn family(&self) -> AddressFamily {
        self.family
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    /// Saves `upload` under a timestamped, sanitized name, returning where
    /// it was stored
    pub fn store_config_file(&self, upload: &ConfigUpload) -> Result<PathBuf> {
        let mut safe_name = secure_filename(&upload.filename);
        if safe_name.is_empty() {
            safe_name = FALLBACK_FILENAME.to_owned();
        }
        let name = format!("{}-{}", Utc::now().format("%Y%m%d%H%M%S%6f"), safe_name);
        self.storage
            .save(&upload.content, &name)
            .map_err(|err| Error::storage(format!("unable to save config file {}", name), err))
    }

    /// Stores, validates and applies `upload` over a single connection.
    ///
    /// Returns the outcome of the validation if it failed (the stored file
    /// is removed then), otherwise the outcome of the activation.
    pub fn deploy_config(&self, upload: &ConfigUpload) -> Result<Outcome<String>> {
        let path = self.store_config_file(upload)?;
        let mut connection = self.client.sync_connection();
        let result = self.deploy_stored(&mut connection, &path);
        connection.close();
        result
    }

    /// The validate and apply part of [BirdManager::deploy_config], for an
    /// already stored file
    pub fn deploy_stored<T: Transport + ?Sized>(
        &self,
        transport: &mut T,
        path: &Path,
    ) -> Result<Outcome<String>> {
        let filename = path.to_string_lossy();
        let args = [("config_filename", filename.as_ref())];

        match VALIDATE_CONFIG.execute(transport, &args) {
            Ok(Outcome::Success(_)) => {}
            Ok(failure) => {
                log::warn!("manager: {} failed validation, removing it", filename);
                self.storage.remove(path).map_err(|err| {
                    Error::storage(format!("unable to remove {}", filename), err)
                })?;
                return Ok(failure);
            }
            Err(err) => {
                if let Err(remove_err) = self.storage.remove(path) {
                    log::error!("manager: unable to remove {}: {}", filename, remove_err);
                }
                return Err(err);
            }
        }

        let outcome = APPLY_CONFIG.execute(transport, &args)?;
        if outcome.is_success() {
            self.symlink_latest_config_file(path)?;
        } else {
            log::warn!("manager: {} passed validation but was not applied", filename);
        }
        Ok(outcome)
    }

    /// Points the family's latest alias at `path`, replacing any previous
    /// alias
    pub fn symlink_latest_config_file(&self, path: &Path) -> Result<PathBuf> {
        let alias_name = self.family.latest_alias_name();
        let alias_error =
            |err: io::Error| Error::storage(format!("unable to update {}", alias_name), err);

        match self.storage.make_alias(path, &alias_name) {
            Ok(alias) => Ok(alias),
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
                self.storage.remove_alias(&alias_name).map_err(alias_error)?;
                self.storage.make_alias(path, &alias_name).map_err(alias_error)
            }
            Err(err) => Err(alias_error(err)),
        }
    }

    /// BGP peer sessions known to the daemon, optionally restricted to the
    /// protocols matching `wildcard`
    pub fn protocol_information_verbose(
        &self,
        wildcard: Option<&str>,
    ) -> Result<Outcome<Vec<PeerSession>>> {
        let mut connection = self.client.sync_connection();
        let result =
            ShowProtocolsAll.execute(&mut connection, &[("wildcard", wildcard.unwrap_or(""))]);
        connection.close();
        result
    }

    /// Text of `show route` for `query`
    pub fn routes_information(&self, query: &RouteQuery) -> Result<Outcome<String>> {
        let selector = query.selector()?;
        let mut connection = self.client.sync_connection();
        let result = SHOW_ROUTE.execute(&mut connection, &[("selector", selector.as_str())]);
        connection.close();
        result
    }
}
