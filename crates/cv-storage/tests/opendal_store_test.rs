//! OpendalStore against OpenDAL's in-memory backend

use bytes::Bytes;
use cv_core::CvError;
use cv_storage::{ByteStream, ObjectStore, OpendalStore};
use futures::{stream, StreamExt, TryStreamExt};
use opendal::Operator;

fn memory_operator() -> Operator {
    Operator::new(opendal::services::Memory::default())
        .expect("memory operator")
        .finish()
}

fn body(chunks: Vec<&'static [u8]>) -> ByteStream {
    stream::iter(chunks.into_iter().map(|c| Ok(Bytes::from_static(c)))).boxed()
}

async fn collect(s: ByteStream) -> Vec<u8> {
    s.try_collect::<Vec<_>>().await.expect("read stream").concat()
}

#[tokio::test]
async fn put_counts_bytes_and_commits() {
    let op = memory_operator();
    let store = OpendalStore::new(op.clone());

    let n = store
        .put("files/objects/a", body(vec![b"hello ", b"", b"world"]))
        .await
        .unwrap();

    assert_eq!(n, 11);
    assert!(store.exists("files/objects/a").await.unwrap());
    assert_eq!(
        op.read("files/objects/a").await.unwrap().to_vec(),
        b"hello world"
    );
}

#[tokio::test]
async fn get_range_returns_only_the_requested_bytes() {
    let store = OpendalStore::new(memory_operator());
    let data: Vec<u8> = (0..=255u8).collect();
    let owned = Bytes::from(data.clone());
    store
        .put("obj", stream::iter(vec![Ok(owned)]).boxed())
        .await
        .unwrap();

    let got = collect(store.get_range("obj", 16, 48).await.unwrap()).await;
    assert_eq!(got, &data[16..48]);
}

#[tokio::test]
async fn failing_body_leaves_no_object() {
    let store = OpendalStore::new(memory_operator());
    let failing: ByteStream = stream::iter(vec![
        Ok(Bytes::from_static(b"partial")),
        Err(std::io::Error::other("client went away")),
    ])
    .boxed();

    let err = store.put("obj", failing).await.unwrap_err();
    assert!(matches!(err, CvError::Io(_)));
    assert!(!store.exists("obj").await.unwrap());
}

#[tokio::test]
async fn delete_is_idempotent() {
    let store = OpendalStore::new(memory_operator());
    store.put("obj", body(vec![b"x"])).await.unwrap();

    store.delete("obj").await.unwrap();
    assert!(!store.exists("obj").await.unwrap());
    store.delete("obj").await.unwrap();
    store.delete("never-existed").await.unwrap();
}

#[tokio::test]
async fn store_is_usable_as_trait_object() {
    let store: std::sync::Arc<dyn ObjectStore> =
        std::sync::Arc::new(OpendalStore::new(memory_operator()));
    store.put("obj", body(vec![b"abc"])).await.unwrap();
    assert_eq!(collect(store.get_range("obj", 1, 3).await.unwrap()).await, b"bc");
}
