//! Collection <-> blob persistence adapter.
//!
//! # Responsibility
//! - Map collection names to stable keys under a namespace.
//! - Encode collections as JSON arrays and decode them back.
//! - Turn unreadable blobs into an empty collection plus a warning.
//!
//! # Invariants
//! - Decode failures never abort a load; they are reported as
//!   [`DecodeWarning`] so callers can surface the data loss.
//! - A batch of collection writes reaches the port as one `commit`.

use crate::kv::{KeyValueStore, KvError, KvOp};
use log::{error, warn};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub type PersistResult<T> = Result<T, PersistError>;

/// Encode or port failure while writing/reading collections.
#[derive(Debug)]
pub enum PersistError {
    Encode {
        key: String,
        source: serde_json::Error,
    },
    Write {
        keys: Vec<String>,
        source: KvError,
    },
}

impl Display for PersistError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Encode { key, source } => write!(f, "failed to encode `{key}`: {source}"),
            Self::Write { keys, source } => {
                write!(f, "failed to write [{}]: {source}", keys.join(", "))
            }
        }
    }
}

impl Error for PersistError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Encode { source, .. } => Some(source),
            Self::Write { source, .. } => Some(source),
        }
    }
}

/// Recoverable load problem: the collection under `key` came back empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodeWarning {
    pub key: String,
    pub message: String,
}

impl Display for DecodeWarning {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "collection `{}` could not be loaded and starts empty: {}",
            self.key, self.message
        )
    }
}

/// Records read for one collection plus an optional data-loss warning.
#[derive(Debug)]
pub struct Loaded<T> {
    pub records: Vec<T>,
    pub warning: Option<DecodeWarning>,
}

/// Pending write for one collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CollectionWrite {
    Replace { collection: String, bytes: Vec<u8> },
    Purge { collection: String },
}

/// Encodes JSON arrays of records.
pub fn encode_collection<T: Serialize>(records: &[T]) -> Result<Vec<u8>, serde_json::Error> {
    serde_json::to_vec(records)
}

/// Decodes JSON arrays of records.
pub fn decode_collection<T: DeserializeOwned>(bytes: &[u8]) -> Result<Vec<T>, serde_json::Error> {
    serde_json::from_slice(bytes)
}

/// Reads and writes named collections through a [`KeyValueStore`].
pub struct PersistenceAdapter<K: KeyValueStore> {
    kv: K,
    namespace: String,
}

impl<K: KeyValueStore> PersistenceAdapter<K> {
    pub fn new(kv: K, namespace: impl Into<String>) -> Self {
        Self {
            kv,
            namespace: namespace.into(),
        }
    }

    /// Persistence key of a collection: `<namespace>/<collection>`.
    pub fn key_for(&self, collection: &str) -> String {
        if self.namespace.is_empty() {
            collection.to_string()
        } else {
            format!("{}/{}", self.namespace, collection)
        }
    }

    pub fn kv(&self) -> &K {
        &self.kv
    }

    /// Loads a collection; an absent key is an empty collection.
    pub fn load<T: DeserializeOwned>(&self, collection: &str) -> Loaded<T> {
        let key = self.key_for(collection);
        let bytes = match self.kv.get(&key) {
            Ok(Some(bytes)) => bytes,
            Ok(None) => {
                return Loaded {
                    records: Vec::new(),
                    warning: None,
                }
            }
            Err(err) => {
                error!("event=collection_load module=persist status=error key={key} error={err}");
                return Loaded {
                    records: Vec::new(),
                    warning: Some(DecodeWarning {
                        key,
                        message: format!("read failed: {err}"),
                    }),
                };
            }
        };

        match decode_collection(&bytes) {
            Ok(records) => Loaded {
                records,
                warning: None,
            },
            Err(err) => {
                warn!(
                    "event=collection_load module=persist status=warn key={key} bytes={} error={err}",
                    bytes.len()
                );
                Loaded {
                    records: Vec::new(),
                    warning: Some(DecodeWarning {
                        key,
                        message: err.to_string(),
                    }),
                }
            }
        }
    }

    /// Writes every pending collection in one port commit.
    pub fn write(&self, writes: Vec<CollectionWrite>) -> PersistResult<()> {
        if writes.is_empty() {
            return Ok(());
        }

        let batch: Vec<KvOp> = writes
            .into_iter()
            .map(|write| match write {
                CollectionWrite::Replace { collection, bytes } => KvOp::Set {
                    key: self.key_for(&collection),
                    value: bytes,
                },
                CollectionWrite::Purge { collection } => KvOp::Remove {
                    key: self.key_for(&collection),
                },
            })
            .collect();

        self.kv.commit(&batch).map_err(|source| PersistError::Write {
            keys: batch.iter().map(|op| op.key().to_string()).collect(),
            source,
        })
    }
}
