//! End-to-end flows through `swarmdir-peer` clients.

use std::time::Duration;

use anyhow::Result;

use swarmdir_core::Chunk;
use swarmdir_peer::{ClientError, ControlClient, MemoryChunks, TransientServer};

use crate::*;

/// bob shares report.pdf chunk 1; alice finds it and pulls it through the relay.
#[tokio::test]
async fn test_download_through_relay() -> Result<()> {
    let reg = start_registry().await?;

    let store = MemoryChunks::new();
    store.insert(Chunk::new("report.pdf", 1), b"quarterly numbers".to_vec());
    let bob_relay = TransientServer::connect(reg.addr, "bob", store, 1024).await?;
    let bob_relay_addr = bob_relay.local_addr();
    let relay_task = tokio::spawn(bob_relay.run());

    let mut bob = ControlClient::connect(reg.addr, "bob").await?;
    bob.announce("report.pdf", 1).await?;

    let mut alice = ControlClient::connect(reg.addr, "alice").await?;
    assert_eq!(alice.query("report.pdf", 1).await?, Some(bob_relay_addr));
    assert_eq!(
        alice.download("report.pdf", 1).await?,
        Some(b"quarterly numbers".to_vec())
    );

    bob.exit().await?;
    tokio::time::timeout(Duration::from_secs(5), relay_task).await???;
    wait_until(5, || reg.state.registry.peer("bob").is_none()).await?;

    assert_eq!(alice.query("report.pdf", 1).await?, None);
    assert!(alice.list().await?.is_empty());
    reg.state.registry.check_invariants().map_err(anyhow::Error::msg)?;
    Ok(())
}

/// A peer downloading its own chunk must not wait on itself.
#[tokio::test]
async fn test_self_download_does_not_deadlock() -> Result<()> {
    let reg = start_registry().await?;

    let store = MemoryChunks::new();
    store.insert(Chunk::new("notes.txt", 1), b"self".to_vec());
    let relay = TransientServer::connect(reg.addr, "carol", store, 1024).await?;
    tokio::spawn(relay.run());

    let mut carol = ControlClient::connect(reg.addr, "carol").await?;
    carol.announce("notes.txt", 1).await?;

    let got = tokio::time::timeout(Duration::from_secs(5), carol.download("notes.txt", 1)).await??;
    assert_eq!(got, Some(b"self".to_vec()));

    // Turn is free again for the next request.
    let again = tokio::time::timeout(Duration::from_secs(5), carol.download("notes.txt", 1)).await??;
    assert_eq!(again, Some(b"self".to_vec()));
    Ok(())
}

/// Multi-chunk file with a short final chunk arrives intact, chunk by chunk.
#[tokio::test]
async fn test_whole_file_reassembles() -> Result<()> {
    let reg = start_registry().await?;

    let data: Vec<u8> = (0..3000u32).map(|i| (i % 251) as u8).collect();
    let store = MemoryChunks::new();
    let count = store.insert_file("movie.mp4", &data, 1024);
    let relay = TransientServer::connect(reg.addr, "bob", store, 1024).await?;
    tokio::spawn(relay.run());

    let mut bob = ControlClient::connect(reg.addr, "bob").await?;
    for n in 1..=count {
        bob.announce("movie.mp4", n).await?;
    }
    bob.announce_size("movie.mp4", data.len() as u64).await?;

    let mut alice = ControlClient::connect(reg.addr, "alice").await?;
    assert_eq!(alice.query_size("movie.mp4").await?, 3000);
    assert_eq!(reg.state.registry.chunk_count("movie.mp4"), 3);

    let mut rebuilt = Vec::new();
    for n in 1..=count {
        let chunk = alice.download("movie.mp4", n).await?.expect("chunk present");
        assert!(chunk.len() <= 1024);
        rebuilt.extend_from_slice(&chunk);
    }
    assert_eq!(rebuilt, data);
    Ok(())
}

/// Exit sweep: only the exiting peer's chunks disappear.
#[tokio::test]
async fn test_exit_sweeps_only_own_chunks() -> Result<()> {
    let reg = start_registry().await?;

    let mut p = ControlClient::connect(reg.addr, "p").await?;
    let mut q = ControlClient::connect(reg.addr, "q").await?;
    p.announce("f", 1).await?;
    p.announce("f", 2).await?;
    p.announce("shared", 1).await?;
    q.announce("shared", 1).await?;

    let mut names = q.list().await?;
    names.sort();
    assert_eq!(names, vec!["f".to_string(), "shared".to_string()]);

    p.exit().await?;
    wait_until(5, || reg.state.registry.peer("p").is_none()).await?;

    assert_eq!(q.query("f", 1).await?, None);
    assert_eq!(q.query("f", 2).await?, None);
    assert!(q.query("shared", 1).await?.is_some());
    assert_eq!(q.list().await?, vec!["shared".to_string()]);
    reg.state.registry.check_invariants().map_err(anyhow::Error::msg)?;
    Ok(())
}

/// A peer that vanishes without EXIT is swept like one that exits.
#[tokio::test]
async fn test_dropped_connection_removes_peer() -> Result<()> {
    let reg = start_registry().await?;

    let mut ghost = ControlClient::connect(reg.addr, "ghost").await?;
    ghost.announce("f", 1).await?;
    drop(ghost);

    wait_until(5, || reg.state.registry.peer("ghost").is_none()).await?;
    assert!(reg.state.registry.list_filenames().is_empty());

    // The name is free again.
    let mut again = ControlClient::connect(reg.addr, "ghost").await?;
    assert_eq!(again.query("f", 1).await?, None);
    Ok(())
}

/// Owner without a relay connection cannot serve downloads.
#[tokio::test]
async fn test_download_without_owner_relay_is_refused() -> Result<()> {
    let reg = start_registry().await?;

    let mut bob = ControlClient::connect(reg.addr, "bob").await?;
    bob.announce("f", 1).await?;
    let mut alice = ControlClient::connect(reg.addr, "alice").await?;

    let err = alice.download("f", 1).await.unwrap_err();
    assert!(matches!(
        err,
        ClientError::Refused(swarmdir_core::ErrorReply::RelayUnavailable)
    ));
    assert_eq!(alice.download("g", 1).await?, None);
    Ok(())
}

/// Registering a name twice in the same role is refused.
#[tokio::test]
async fn test_duplicate_name_is_refused() -> Result<()> {
    let reg = start_registry().await?;
    let _first = ControlClient::connect(reg.addr, "bob").await?;
    let err = ControlClient::connect(reg.addr, "bob").await.err().expect("second bob refused");
    assert!(matches!(
        err,
        ClientError::Refused(swarmdir_core::ErrorReply::AlreadyRegistered)
    ));
    Ok(())
}
