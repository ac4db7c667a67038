mod common;

use common::{store, store_with};
use modelbase_core::{BlobHash, BlobRepository, ErrorKind, StoreConfig};
use std::io::{Cursor, Read, Seek, SeekFrom};

/// Yields bytes in small uneven reads.
struct Dribble {
    data: Vec<u8>,
    position: usize,
}

impl Read for Dribble {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let take = (self.data.len() - self.position).min(buf.len()).min(7);
        buf[..take].copy_from_slice(&self.data[self.position..self.position + take]);
        self.position += take;
        Ok(take)
    }
}

fn small_chunks() -> StoreConfig {
    StoreConfig {
        blob_chunk_size: 16,
        ..StoreConfig::default()
    }
}

#[test]
fn identical_bytes_share_one_blob() {
    let store = store();
    let first = store.put_blob_bytes(b"same content").unwrap();
    let second = store
        .put_blob(&mut Cursor::new(b"same content".to_vec()))
        .unwrap();

    assert_eq!(first.hash, second.hash);
    assert_eq!(first.length, 12);
    assert_eq!(store.blob_count().unwrap(), 1);
}

#[test]
fn duplicate_stream_reports_existing_blob() {
    let store = store_with(small_chunks());
    let blobs = store.blobs();
    let data = (0..100_u8).collect::<Vec<_>>();

    let created = blobs.put_reader(&mut Cursor::new(data.clone())).unwrap();
    assert!(created.created);
    let again = blobs
        .put_reader(&mut Dribble {
            data,
            position: 0,
        })
        .unwrap();
    assert!(!again.created);
    assert_eq!(again.handle.hash, created.handle.hash);
    assert_eq!(blobs.count().unwrap(), 1);
}

#[test]
fn hash_is_sha256_of_content() {
    let store = store();
    let handle = store.put_blob_bytes(b"abc").unwrap();
    assert_eq!(
        handle.hash.as_str(),
        "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
    );
}

#[test]
fn multi_chunk_blob_reads_back_exactly() {
    let store = store_with(small_chunks());
    let data = (0..1000_u32).map(|n| (n % 251) as u8).collect::<Vec<_>>();
    let handle = store
        .put_blob(&mut Dribble {
            data: data.clone(),
            position: 0,
        })
        .unwrap();
    assert_eq!(handle.length, 1000);

    let mut reader = store.open_blob(&handle.hash).unwrap();
    assert_eq!(reader.len(), 1000);
    let mut read_back = Vec::new();
    reader.read_to_end(&mut read_back).unwrap();
    assert_eq!(read_back, data);
}

#[test]
fn reader_supports_random_access() {
    let store = store_with(small_chunks());
    let data = (0..200_u8).collect::<Vec<_>>();
    let handle = store.put_blob_bytes(&data).unwrap();
    let mut reader = store.open_blob(&handle.hash).unwrap();

    reader.seek(SeekFrom::Start(150)).unwrap();
    let mut buf = [0_u8; 10];
    reader.read_exact(&mut buf).unwrap();
    assert_eq!(&buf[..], &data[150..160]);

    reader.seek(SeekFrom::Current(-100)).unwrap();
    reader.read_exact(&mut buf).unwrap();
    assert_eq!(&buf[..], &data[60..70]);

    let end = reader.seek(SeekFrom::End(-5)).unwrap();
    assert_eq!(end, 195);
    let mut tail = Vec::new();
    reader.read_to_end(&mut tail).unwrap();
    assert_eq!(tail, &data[195..]);

    assert!(reader.seek(SeekFrom::Current(-1000)).is_err());
}

#[test]
fn empty_blob_is_stored_once() {
    let store = store();
    let first = store.put_blob_bytes(b"").unwrap();
    let second = store.put_blob(&mut Cursor::new(Vec::new())).unwrap();
    assert_eq!(first.hash, second.hash);
    assert_eq!(first.length, 0);

    let mut reader = store.open_blob(&first.hash).unwrap();
    assert!(reader.is_empty());
    let mut out = Vec::new();
    assert_eq!(reader.read_to_end(&mut out).unwrap(), 0);
}

#[test]
fn opening_unknown_hash_is_not_found() {
    let store = store();
    let hash = BlobHash::parse(&"0".repeat(64)).unwrap();
    let err = store.open_blob(&hash).err().unwrap();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert_eq!(store.blob(&hash).unwrap(), None);
}

#[test]
fn failed_stream_leaves_no_blob_behind() {
    struct Failing(usize);
    impl Read for Failing {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if self.0 == 0 {
                return Err(std::io::Error::other("source vanished"));
            }
            self.0 -= 1;
            buf[0] = b'x';
            Ok(1)
        }
    }

    let store = store_with(small_chunks());
    let err = store.put_blob(&mut Failing(40)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::StorageError);
    assert_eq!(store.blob_count().unwrap(), 0);
}
