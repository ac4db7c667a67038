use rusqlite::Connection;
use std::io::{self, Read, Seek, SeekFrom};

/// Seekable stream over one stored blob.
///
/// Holds at most one chunk in memory; a read or seek into another chunk
/// fetches that chunk on demand.
pub struct BlobReader<'conn> {
    conn: &'conn Connection,
    blob_id: i64,
    length: u64,
    chunk_size: usize,
    position: u64,
    cached: Option<(u64, Vec<u8>)>,
}

impl<'conn> BlobReader<'conn> {
    pub(crate) fn new(conn: &'conn Connection, blob_id: i64, length: u64, chunk_size: usize) -> Self {
        Self {
            conn,
            blob_id,
            length,
            chunk_size: chunk_size.max(1),
            position: 0,
            cached: None,
        }
    }

    pub fn len(&self) -> u64 {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    fn chunk(&mut self, index: u64) -> io::Result<&[u8]> {
        let stale = !matches!(&self.cached, Some((cached, _)) if *cached == index);
        if stale {
            let data: Vec<u8> = self
                .conn
                .query_row(
                    "SELECT data FROM blob_chunks WHERE blob_id = ?1 AND chunk_index = ?2;",
                    rusqlite::params![self.blob_id, index as i64],
                    |row| row.get(0),
                )
                .map_err(io::Error::other)?;
            self.cached = Some((index, data));
        }
        match &self.cached {
            Some((_, data)) => Ok(data),
            None => Err(io::Error::other("blob chunk cache is empty")),
        }
    }
}

impl Read for BlobReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() || self.position >= self.length {
            return Ok(0);
        }
        let chunk_size = self.chunk_size as u64;
        let index = self.position / chunk_size;
        let offset = (self.position % chunk_size) as usize;
        let chunk = self.chunk(index)?;
        if offset >= chunk.len() {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "stored blob chunk is shorter than recorded",
            ));
        }
        let available = &chunk[offset..];
        let take = available.len().min(buf.len());
        buf[..take].copy_from_slice(&available[..take]);
        self.position += take as u64;
        Ok(take)
    }
}

impl Seek for BlobReader<'_> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(offset) => Some(offset),
            SeekFrom::End(delta) => self.length.checked_add_signed(delta),
            SeekFrom::Current(delta) => self.position.checked_add_signed(delta),
        };
        match target {
            Some(position) => {
                self.position = position;
                Ok(position)
            }
            None => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek before start of blob",
            )),
        }
    }
}
