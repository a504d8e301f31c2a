//! Contract invariants every backend must satisfy, run against the
//! in-memory, filesystem and bucket implementations.

use std::sync::Arc;

use bytes::Bytes;
use futures::TryStreamExt;
use tempfile::TempDir;

use cask_store::backend::chunked;
use cask_store::{Backend, BucketBackend, ContentId, FilesBackend, MediaType, MemoryBackend};

async fn exercise(backend: Arc<dyn Backend>) {
    let body = Bytes::from_static(b"contract body");
    let id = ContentId::digest(&body);
    let media_type = MediaType::text_plain();

    // 1. before any write, every query reads absent
    assert!(!backend.exists(&id).await.unwrap());
    assert!(backend.read(&id).await.unwrap().is_none());
    assert!(backend.media_type(&id).await.unwrap().is_none());
    assert!(backend.hash(&id).await.unwrap().is_none());
    assert!(backend.token(&id).await.unwrap().is_none());
    assert!(backend.read_stream(&id).await.unwrap().is_none());

    // 2. a successful write makes every query agree
    assert!(backend
        .write(&id, body.clone(), &media_type, None)
        .await
        .unwrap());
    assert!(backend.exists(&id).await.unwrap());
    let object = backend.read(&id).await.unwrap().unwrap();
    assert_eq!(object.content, body);
    assert_eq!(object.media_type, media_type);
    assert_eq!(backend.media_type(&id).await.unwrap().unwrap(), media_type);
    assert!(backend.hash(&id).await.unwrap().is_some());
    let chunks: Vec<Bytes> = backend
        .read_stream(&id)
        .await
        .unwrap()
        .unwrap()
        .try_collect()
        .await
        .unwrap();
    assert_eq!(Bytes::from(chunks.concat()), body);

    // 3. a wrong (stale) token refuses the write and changes nothing
    let valid = backend.token(&id).await.unwrap().unwrap();
    assert!(backend
        .write(&id, Bytes::from_static(b"second"), &media_type, Some(&valid))
        .await
        .unwrap());
    assert!(!backend
        .write(&id, Bytes::from_static(b"third"), &media_type, Some(&valid))
        .await
        .unwrap());
    assert_eq!(
        backend.read(&id).await.unwrap().unwrap().content,
        Bytes::from_static(b"second")
    );

    // 4. the correct token wins and is consumed by the write
    let current = backend.token(&id).await.unwrap().unwrap();
    assert!(backend
        .write(&id, Bytes::from_static(b"fourth"), &media_type, Some(&current))
        .await
        .unwrap());
    let renewed = backend.token(&id).await.unwrap().unwrap();
    assert_ne!(
        renewed.value(backend.id()).unwrap(),
        current.value(backend.id()).unwrap()
    );

    // tokenless write on an occupied id is a conflict
    assert!(!backend
        .write(&id, Bytes::from_static(b"fifth"), &media_type, None)
        .await
        .unwrap());

    // 5. a matching token deletes; the id reads absent afterwards
    assert!(backend.delete(&id, &renewed).await.unwrap());
    assert!(!backend.exists(&id).await.unwrap());
    assert!(backend.read(&id).await.unwrap().is_none());

    // 6. write_stream round-trips identically to write
    let streamed = Bytes::from_static(b"streamed contract body");
    let streamed_id = ContentId::digest(&streamed);
    assert!(backend
        .write_stream(&streamed_id, chunked(streamed.clone(), 7), &media_type, None)
        .await
        .unwrap());
    let object = backend.read(&streamed_id).await.unwrap().unwrap();
    assert_eq!(object.content, streamed);
    assert_eq!(object.media_type, media_type);

    // 7. rename moves bytes, type and hash to the new id
    let target = ContentId::digest(b"rename target address");
    let hash = backend.hash(&streamed_id).await.unwrap().unwrap();
    assert!(backend.rename(&streamed_id, &target).await.unwrap());
    assert!(!backend.exists(&streamed_id).await.unwrap());
    assert!(backend.exists(&target).await.unwrap());
    assert_eq!(backend.hash(&target).await.unwrap().unwrap(), hash);
    assert_eq!(
        backend.read(&target).await.unwrap().unwrap().content,
        streamed
    );

    // rename refuses both a missing source and an occupied target
    assert!(!backend.rename(&streamed_id, &target).await.unwrap());
    let other = ContentId::digest(b"other occupied blob");
    backend
        .write(&other, Bytes::from_static(b"occupied"), &media_type, None)
        .await
        .unwrap();
    assert!(!backend.rename(&other, &target).await.unwrap());

    // list sees exactly the stored ids
    let mut listed: Vec<ContentId> = backend.list().try_collect().await.unwrap();
    listed.sort();
    let mut expected = vec![target, other];
    expected.sort();
    assert_eq!(listed, expected);
}

#[tokio::test]
async fn memory_backend_satisfies_contract() {
    exercise(Arc::new(MemoryBackend::new())).await;
}

#[tokio::test]
async fn files_backend_satisfies_contract() {
    let dir = TempDir::new().unwrap();
    let backend = FilesBackend::new(dir.path()).await.unwrap();
    exercise(Arc::new(backend)).await;
}

#[tokio::test]
async fn bucket_backend_satisfies_contract() {
    exercise(Arc::new(BucketBackend::memory())).await;
}

#[tokio::test]
async fn bucket_backend_with_prefix_satisfies_contract() {
    let inner = Arc::new(object_store::memory::InMemory::new());
    exercise(Arc::new(BucketBackend::new(inner, "nested/prefix"))).await;
}

#[tokio::test]
async fn name_ids_store_alongside_content_ids() {
    let dir = TempDir::new().unwrap();
    let backend = FilesBackend::new(dir.path()).await.unwrap();

    let nid = ContentId::name("some-name");
    let body = Bytes::from_static(b"pointer body");
    assert!(backend
        .write(&nid, body.clone(), &MediaType::default(), None)
        .await
        .unwrap());
    assert_eq!(backend.read(&nid).await.unwrap().unwrap().content, body);

    let listed: Vec<ContentId> = backend.list().try_collect().await.unwrap();
    assert_eq!(listed, vec![nid]);
}
