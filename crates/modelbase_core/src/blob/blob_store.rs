use super::reader::BlobReader;
use crate::codec::{decode_timestamp, encode_timestamp};
use crate::db::Savepoint;
use crate::error::{NotFound, StoreResult};
use crate::model::BlobHash;
use log::{debug, info};
use rusqlite::{params, Connection, OptionalExtension};
use sha2::{Digest, Sha256};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use time::OffsetDateTime;

/// Metadata of one stored blob.
#[derive(Debug, Clone, PartialEq)]
pub struct BlobHandle {
    pub hash: BlobHash,
    pub length: u64,
    pub created_at: OffsetDateTime,
}

/// Result of a put: the handle plus whether new storage was allocated.
#[derive(Debug, Clone, PartialEq)]
pub struct BlobPut {
    pub handle: BlobHandle,
    pub created: bool,
}

/// Blob storage contract used by the object store and pipelines.
pub trait BlobRepository {
    /// Streams `reader` into the store, hashing in the same pass.
    fn put_reader(&self, reader: &mut dyn Read) -> StoreResult<BlobPut>;
    fn put_bytes(&self, bytes: &[u8]) -> StoreResult<BlobPut>;
    fn handle(&self, hash: &BlobHash) -> StoreResult<Option<BlobHandle>>;
    fn open(&self, hash: &BlobHash) -> StoreResult<BlobReader<'_>>;
    fn count(&self) -> StoreResult<u64>;
}

/// SQLite blob store: one `blobs` row per hash, bytes split across `blob_chunks`.
pub struct SqliteBlobStore<'conn> {
    conn: &'conn Connection,
    chunk_size: usize,
}

impl<'conn> SqliteBlobStore<'conn> {
    pub fn new(conn: &'conn Connection, chunk_size: usize) -> Self {
        Self {
            conn,
            chunk_size: chunk_size.max(1),
        }
    }

    pub fn exists(&self, hash: &BlobHash) -> StoreResult<bool> {
        Ok(self.lookup(hash)?.is_some())
    }

    /// Like [`BlobRepository::open`], but the reader only borrows the connection.
    pub fn open_reader(&self, hash: &BlobHash) -> StoreResult<BlobReader<'conn>> {
        let (blob_id, handle, chunk_size) = self
            .lookup(hash)?
            .ok_or_else(|| NotFound::Blob(hash.clone()))?;
        Ok(BlobReader::new(self.conn, blob_id, handle.length, chunk_size))
    }

    fn lookup(&self, hash: &BlobHash) -> StoreResult<Option<(i64, BlobHandle, usize)>> {
        let row = self
            .conn
            .query_row(
                "SELECT id, length, chunk_size, created_at FROM blobs WHERE hash = ?1;",
                [hash.as_str()],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, i64>(2)?,
                        row.get::<_, String>(3)?,
                    ))
                },
            )
            .optional()?;

        match row {
            None => Ok(None),
            Some((id, length, chunk_size, created_at)) => Ok(Some((
                id,
                BlobHandle {
                    hash: hash.clone(),
                    length: length as u64,
                    created_at: decode_timestamp(&created_at)?,
                },
                chunk_size as usize,
            ))),
        }
    }

    /// Hashes `reader` into an anonymous spool file, then copies the spool
    /// into SQLite only when the hash is not stored yet.
    fn stage(&self, reader: &mut dyn Read) -> StoreResult<BlobPut> {
        let mut spool = tempfile::tempfile()?;
        let mut hasher = Sha256::new();
        let mut buffer = vec![0_u8; self.chunk_size];
        let mut length = 0_u64;
        loop {
            let filled = fill_buffer(reader, &mut buffer)?;
            if filled == 0 {
                break;
            }
            hasher.update(&buffer[..filled]);
            spool.write_all(&buffer[..filled])?;
            length += filled as u64;
            if filled < buffer.len() {
                break;
            }
        }

        let hash = BlobHash::from_digest(&hasher.finalize());
        if let Some(put) = self.deduplicated(&hash)? {
            return Ok(put);
        }
        spool.seek(SeekFrom::Start(0))?;
        self.write_new(hash, length, &mut spool)
    }

    fn deduplicated(&self, hash: &BlobHash) -> StoreResult<Option<BlobPut>> {
        let Some((_, handle, _)) = self.lookup(hash)? else {
            return Ok(None);
        };
        debug!(
            "event=blob_put module=blob status=ok outcome=deduplicated length={}",
            handle.length
        );
        Ok(Some(BlobPut {
            handle,
            created: false,
        }))
    }

    /// Writes the row and chunks of a blob whose hash is not stored yet.
    fn write_new(
        &self,
        hash: BlobHash,
        length: u64,
        reader: &mut dyn Read,
    ) -> StoreResult<BlobPut> {
        let savepoint = Savepoint::begin(self.conn, "blob_put")?;
        let created_at = OffsetDateTime::now_utc();
        self.conn.execute(
            "INSERT INTO blobs (hash, length, chunk_size, created_at) VALUES (?1, ?2, ?3, ?4);",
            params![
                hash.as_str(),
                length as i64,
                self.chunk_size as i64,
                encode_timestamp(created_at)?
            ],
        )?;
        let blob_id = self.conn.last_insert_rowid();

        let mut buffer = vec![0_u8; self.chunk_size];
        let mut written = 0_u64;
        let mut chunk_index = 0_i64;
        {
            let mut insert_chunk = self.conn.prepare_cached(
                "INSERT INTO blob_chunks (blob_id, chunk_index, data) VALUES (?1, ?2, ?3);",
            )?;
            while written < length {
                let filled = fill_buffer(reader, &mut buffer)?;
                if filled == 0 {
                    break;
                }
                insert_chunk.execute(params![blob_id, chunk_index, &buffer[..filled]])?;
                written += filled as u64;
                chunk_index += 1;
            }
        }
        if written != length {
            return Err(std::io::Error::new(
                ErrorKind::UnexpectedEof,
                format!("blob spool held {written} of {length} bytes"),
            )
            .into());
        }
        savepoint.commit()?;
        info!(
            "event=blob_put module=blob status=ok outcome=created length={length} chunks={chunk_index}"
        );

        Ok(BlobPut {
            handle: BlobHandle {
                hash,
                length,
                created_at,
            },
            created: true,
        })
    }
}

impl BlobRepository for SqliteBlobStore<'_> {
    fn put_reader(&self, reader: &mut dyn Read) -> StoreResult<BlobPut> {
        self.stage(reader)
    }

    fn put_bytes(&self, bytes: &[u8]) -> StoreResult<BlobPut> {
        let hash = BlobHash::from_digest(&Sha256::digest(bytes));
        if let Some(put) = self.deduplicated(&hash)? {
            return Ok(put);
        }
        let mut cursor = bytes;
        self.write_new(hash, bytes.len() as u64, &mut cursor)
    }

    fn handle(&self, hash: &BlobHash) -> StoreResult<Option<BlobHandle>> {
        Ok(self.lookup(hash)?.map(|(_, handle, _)| handle))
    }

    fn open(&self, hash: &BlobHash) -> StoreResult<BlobReader<'_>> {
        self.open_reader(hash)
    }

    fn count(&self) -> StoreResult<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM blobs;", [], |row| row.get(0))?;
        Ok(count as u64)
    }
}

/// Reads until `buffer` is full or the source is exhausted.
pub(crate) fn fill_buffer(reader: &mut dyn Read, buffer: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buffer.len() {
        match reader.read(&mut buffer[filled..]) {
            Ok(0) => break,
            Ok(read) => filled += read,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        }
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::{fill_buffer, BlobRepository, SqliteBlobStore};
    use crate::db::open_db_in_memory;
    use std::io::Read;

    /// Hands out at most three bytes per read call.
    struct Trickle<'a>(&'a [u8]);

    impl Read for Trickle<'_> {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            let take = self.0.len().min(buf.len()).min(3);
            buf[..take].copy_from_slice(&self.0[..take]);
            self.0 = &self.0[take..];
            Ok(take)
        }
    }

    #[test]
    fn fill_buffer_collects_short_reads() {
        let mut source = Trickle(b"abcdefghij");
        let mut buffer = [0_u8; 8];
        assert_eq!(fill_buffer(&mut source, &mut buffer).expect("fill"), 8);
        assert_eq!(&buffer, b"abcdefgh");
        assert_eq!(fill_buffer(&mut source, &mut buffer).expect("fill"), 2);
        assert_eq!(fill_buffer(&mut source, &mut buffer).expect("fill"), 0);
    }

    #[test]
    fn duplicate_stream_put_changes_no_rows() {
        let conn = open_db_in_memory().expect("open db");
        let blobs = SqliteBlobStore::new(&conn, 4);
        let data = b"twenty bytes of data";

        let first = blobs.put_reader(&mut Trickle(data)).expect("first put");
        assert!(first.created);
        let after_first = conn.total_changes();
        assert!(after_first > 0);

        let second = blobs.put_reader(&mut Trickle(data)).expect("second put");
        assert!(!second.created);
        assert_eq!(second.handle.hash, first.handle.hash);
        assert_eq!(conn.total_changes(), after_first);

        let third = blobs.put_bytes(data).expect("bytes put");
        assert!(!third.created);
        assert_eq!(conn.total_changes(), after_first);
    }

    #[test]
    fn spooled_put_stores_every_chunk() {
        let conn = open_db_in_memory().expect("open db");
        let blobs = SqliteBlobStore::new(&conn, 4);
        let data = (0..37_u8).collect::<Vec<_>>();

        let put = blobs.put_reader(&mut Trickle(&data)).expect("put");
        assert_eq!(put.handle.length, 37);
        let mut read_back = Vec::new();
        blobs
            .open_reader(&put.handle.hash)
            .expect("open")
            .read_to_end(&mut read_back)
            .expect("read");
        assert_eq!(read_back, data);

        let chunks: i64 = conn
            .query_row("SELECT COUNT(*) FROM blob_chunks;", [], |row| row.get(0))
            .expect("count chunks");
        assert_eq!(chunks, 10);
    }
}
