//! Chunked columns spread across a live cluster.

use bytes::Bytes;
use strata_core::key::Key;
use strata_services::ChunkedColumn;

use crate::*;

/// A writer on node 0 fills a column past two chunk boundaries, then a
/// reader on node 1 opens the column from its published layout and
/// reads elements out of flushed chunks and the tail snapshot.
#[tokio::test]
async fn a_column_written_on_one_node_is_readable_from_another() {
    let (server, peers) = start_cluster(3).await;

    // Default chunk size is 100: 250 pushes leave two flushed chunks
    // plus a 50-element tail, with chunk homes picked at random.
    let mut column = ChunkedColumn::<i64>::new(peers[0].store().clone(), "measurements", 0);
    for i in 0..250 {
        column.push(i).await.unwrap();
    }
    assert_eq!(column.len(), 250);
    assert_eq!(column.flushed_chunks(), 2);

    let layout_key = Key::new("measurements-layout", 1);
    peers[0]
        .store()
        .put(&layout_key, column.encode_layout())
        .await
        .unwrap();

    let blob = peers[1].store().wait_and_get(&layout_key).await.unwrap();
    let mut reader =
        ChunkedColumn::<i64>::decode_layout(peers[1].store().clone(), &blob).unwrap();

    assert_eq!(reader.len(), 250);
    assert_eq!(reader.get(150).await.unwrap(), 150);
    assert_eq!(reader.get(0).await.unwrap(), 0);
    assert_eq!(reader.get(99).await.unwrap(), 99);
    // 210 sits in the tail snapshot the layout carried.
    assert_eq!(reader.get(210).await.unwrap(), 210);

    server.shutdown();
}

#[tokio::test]
async fn the_writer_reads_back_its_own_flushed_and_tail_elements() {
    let (server, peers) = start_cluster(2).await;

    let mut column = ChunkedColumn::<String>::new(peers[0].store().clone(), "labels", 3);
    for i in 0..120 {
        column.push(format!("row-{i}")).await.unwrap();
    }

    assert_eq!(column.get(15).await.unwrap(), "row-15");
    assert_eq!(column.get(119).await.unwrap(), "row-119");

    server.shutdown();
}

#[tokio::test]
async fn set_into_a_flushed_chunk_rewrites_the_stored_chunk() {
    let (server, peers) = start_cluster(2).await;

    let mut column = ChunkedColumn::<i64>::new(peers[0].store().clone(), "scores", 0);
    for i in 0..150 {
        column.push(i).await.unwrap();
    }

    column.set(25, -1).await.unwrap();
    assert_eq!(column.get(25).await.unwrap(), -1);

    // A fresh reader sees the rewrite too: the whole chunk was re-put.
    let layout_key = Key::new("scores-layout", 0);
    peers[0]
        .store()
        .put(&layout_key, column.encode_layout())
        .await
        .unwrap();
    let blob: Bytes = peers[1].store().wait_and_get(&layout_key).await.unwrap();
    let mut reader =
        ChunkedColumn::<i64>::decode_layout(peers[1].store().clone(), &blob).unwrap();
    assert_eq!(reader.get(25).await.unwrap(), -1);
    assert_eq!(reader.get(26).await.unwrap(), 26);

    server.shutdown();
}
