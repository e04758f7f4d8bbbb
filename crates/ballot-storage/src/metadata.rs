//! Process metadata artifacts: content-addressed, JSON-encoded so an
//! operator can read them straight out of the keyspace, fronted by a
//! bounded cache.

use ballot_types::{
    decode_artifact, derive_key, encode_artifact, EncodingFormat, ProcessMetadata,
};

use crate::db::prefix;
use crate::error::{Result, StorageError};
use crate::Storage;

impl Storage {
    /// Stores a metadata artifact and returns its content-derived key.
    /// Storing the same artifact twice yields the same key.
    pub fn set_metadata(&self, metadata: &ProcessMetadata) -> Result<Vec<u8>> {
        let encoded = encode_artifact(EncodingFormat::Json, metadata)?;
        let key = derive_key(&encoded);

        let _guard = self.lock_global();
        let mut tx = self.db().write_tx();
        tx.set(prefix::METADATA, &key, encoded);
        tx.commit()?;

        self.metadata_cache().insert(key.clone(), metadata.clone());
        Ok(key)
    }

    /// Fetches a metadata artifact by key, consulting the cache first.
    pub fn metadata(&self, key: &[u8]) -> Result<ProcessMetadata> {
        if let Some(cached) = self.metadata_cache().get(&key.to_vec()) {
            return Ok(cached);
        }
        let bytes = self
            .db()
            .get(prefix::METADATA, key)?
            .ok_or(StorageError::NotFound)?;
        let metadata: ProcessMetadata = decode_artifact(EncodingFormat::Json, &bytes)?;
        self.metadata_cache().insert(key.to_vec(), metadata.clone());
        Ok(metadata)
    }
}
