//! Per-peer send-turn, observed from a hand-driven relay.

use std::time::Duration;

use anyhow::Result;

use crate::*;

async fn read_instruction(relay: &mut RawConn) -> Result<(String, String)> {
    relay.expect("DOWNLOAD").await?;
    let filename = relay.record().await?;
    let _number = relay.record().await?;
    let requester = relay.record().await?;
    Ok((filename, requester))
}

async fn upload(relay: &mut RawConn, target: &str, payload: &[u8]) -> Result<()> {
    relay
        .send(format!("UPLOAD\r\n{target}\r\n").as_bytes())
        .await?;
    relay.expect("ACK").await?;
    let mut frame = format!("DATA\r\nf.bin\r\n1\r\n{}\r\n", payload.len()).into_bytes();
    frame.extend_from_slice(payload);
    relay.send(&frame).await
}

async fn expect_frame(conn: &mut RawConn, payload: &[u8]) -> Result<()> {
    conn.expect("DATA").await?;
    conn.expect("f.bin").await?;
    conn.expect("1").await?;
    conn.expect(&payload.len().to_string()).await?;
    assert_eq!(conn.bytes(payload.len()).await?, payload);
    Ok(())
}

/// bob owns f.bin#1 and is served by a raw relay connection.
async fn owner_with_raw_relay(reg: &TestRegistry) -> Result<(RawConn, RawConn)> {
    let relay = RawConn::register(reg.addr, "bob", "TRANSIENT").await?;
    let mut bob = RawConn::register(reg.addr, "bob", "CLIENT").await?;
    bob.send(b"INFORM\r\nf.bin\r\n1\r\n").await?;
    bob.expect("ACK").await?;
    Ok((relay, bob))
}

#[tokio::test]
async fn test_second_instruction_waits_for_first_copy() -> Result<()> {
    let reg = start_registry().await?;
    let (mut relay, _bob) = owner_with_raw_relay(&reg).await?;
    let mut alice = RawConn::register(reg.addr, "alice", "CLIENT").await?;
    let mut carol = RawConn::register(reg.addr, "carol", "CLIENT").await?;

    alice.send(b"DOWNLOAD\r\nf.bin\r\n1\r\n").await?;
    carol.send(b"DOWNLOAD\r\nf.bin\r\n1\r\n").await?;

    let (_, first) = read_instruction(&mut relay).await?;
    assert!(
        relay.quiet_for(300).await,
        "second DOWNLOAD written while the first relay was outstanding"
    );
    upload(&mut relay, &first, b"one").await?;

    let (_, second) = read_instruction(&mut relay).await?;
    assert_ne!(first, second);
    upload(&mut relay, &second, b"two").await?;

    let (first_conn, second_conn) = if first == "alice" {
        (&mut alice, &mut carol)
    } else {
        (&mut carol, &mut alice)
    };
    expect_frame(first_conn, b"one").await?;
    expect_frame(second_conn, b"two").await?;
    Ok(())
}

#[tokio::test]
async fn test_turn_released_when_target_is_gone() -> Result<()> {
    let reg = start_registry().await?;
    let (mut relay, _bob) = owner_with_raw_relay(&reg).await?;

    let mut alice = RawConn::register(reg.addr, "alice", "CLIENT").await?;
    alice.send(b"DOWNLOAD\r\nf.bin\r\n1\r\n").await?;
    let (_, requester) = read_instruction(&mut relay).await?;
    assert_eq!(requester, "alice");
    drop(alice);
    wait_until(5, || reg.state.registry.peer("alice").is_none()).await?;

    // Payload is drained and discarded; the turn comes back.
    upload(&mut relay, "alice", b"lost").await?;

    let mut carol = RawConn::register(reg.addr, "carol", "CLIENT").await?;
    carol.send(b"DOWNLOAD\r\nf.bin\r\n1\r\n").await?;
    let (_, requester) = read_instruction(&mut relay).await?;
    assert_eq!(requester, "carol");
    upload(&mut relay, "carol", b"kept").await?;
    expect_frame(&mut carol, b"kept").await?;
    Ok(())
}

#[tokio::test]
async fn test_truncated_upload_closes_both_sides() -> Result<()> {
    let reg = start_registry().await?;
    let (mut relay, _bob) = owner_with_raw_relay(&reg).await?;
    let mut carol = RawConn::register(reg.addr, "carol", "CLIENT").await?;

    carol.send(b"DOWNLOAD\r\nf.bin\r\n1\r\n").await?;
    read_instruction(&mut relay).await?;
    relay.send(b"UPLOAD\r\ncarol\r\n").await?;
    relay.expect("ACK").await?;
    relay.send(b"DATA\r\nf.bin\r\n1\r\n100\r\nonly ten b").await?;
    drop(relay);

    wait_until(5, || reg.state.registry.peer("bob").is_none()).await?;
    wait_until(5, || reg.state.registry.peer("carol").is_none()).await?;
    assert!(reg.state.registry.list_filenames().is_empty());
    reg.state.registry.check_invariants().map_err(anyhow::Error::msg)?;
    Ok(())
}

#[tokio::test]
async fn test_unanswered_instruction_is_reclaimed() -> Result<()> {
    let reg = start_registry_with(TransferSettings {
        send_turn_timeout: Duration::from_millis(300),
        ..TransferSettings::default()
    })
    .await?;
    let (mut relay, _bob) = owner_with_raw_relay(&reg).await?;

    let mut alice = RawConn::register(reg.addr, "alice", "CLIENT").await?;
    alice.send(b"DOWNLOAD\r\nf.bin\r\n1\r\n").await?;
    read_instruction(&mut relay).await?;
    // The relay never answers.
    alice.expect("Relay unavailable").await?;

    let mut carol = RawConn::register(reg.addr, "carol", "CLIENT").await?;
    carol.send(b"DOWNLOAD\r\nf.bin\r\n1\r\n").await?;
    let (_, requester) = read_instruction(&mut relay).await?;
    assert_eq!(requester, "carol");
    upload(&mut relay, "carol", b"late but fine").await?;
    expect_frame(&mut carol, b"late but fine").await?;
    Ok(())
}

#[tokio::test]
async fn test_late_upload_leaves_newer_download_parked() -> Result<()> {
    let reg = start_registry_with(TransferSettings {
        send_turn_timeout: Duration::from_millis(500),
        ..TransferSettings::default()
    })
    .await?;
    let (mut relay, _bob) = owner_with_raw_relay(&reg).await?;
    let mut alice = RawConn::register(reg.addr, "alice", "CLIENT").await?;
    let mut carol = RawConn::register(reg.addr, "carol", "CLIENT").await?;

    alice.send(b"DOWNLOAD\r\nf.bin\r\n1\r\n").await?;
    read_instruction(&mut relay).await?;
    alice.expect("Relay unavailable").await?;

    carol.send(b"DOWNLOAD\r\nf.bin\r\n1\r\n").await?;
    let (_, requester) = read_instruction(&mut relay).await?;
    assert_eq!(requester, "carol");

    // The relay finally answers alice's reclaimed instruction.
    upload(&mut relay, "alice", b"stale").await?;
    upload(&mut relay, "carol", b"fresh").await?;

    expect_frame(&mut carol, b"fresh").await?;
    assert!(alice.quiet_for(200).await, "alice got a frame after Relay unavailable");
    wait_until(5, || {
        reg.state
            .registry
            .peer("bob")
            .is_some_and(|e| e.send_turn.is_available())
    })
    .await?;
    Ok(())
}

#[tokio::test]
async fn test_owner_exit_answers_parked_download() -> Result<()> {
    // Default timeout is far longer than the reads below wait.
    let reg = start_registry().await?;
    let (mut relay, mut bob) = owner_with_raw_relay(&reg).await?;
    let mut alice = RawConn::register(reg.addr, "alice", "CLIENT").await?;

    alice.send(b"DOWNLOAD\r\nf.bin\r\n1\r\n").await?;
    read_instruction(&mut relay).await?;

    bob.send(b"EXIT\r\n").await?;
    bob.expect("GOODBYE").await?;
    relay.expect("EXIT").await?;
    alice.expect("Relay unavailable").await?;

    alice.send(b"QUERY\r\nf.bin\r\n1\r\n").await?;
    alice.expect("REPLY").await?;
    alice.expect("CHUNK NOT EXIST").await?;
    Ok(())
}

#[tokio::test]
async fn test_dropped_relay_answers_parked_download() -> Result<()> {
    let reg = start_registry().await?;
    let (mut relay, _bob) = owner_with_raw_relay(&reg).await?;
    let mut alice = RawConn::register(reg.addr, "alice", "CLIENT").await?;

    alice.send(b"DOWNLOAD\r\nf.bin\r\n1\r\n").await?;
    read_instruction(&mut relay).await?;
    drop(relay);

    alice.expect("Relay unavailable").await?;
    wait_until(5, || reg.state.registry.peer("bob").is_none()).await?;
    reg.state.registry.check_invariants().map_err(anyhow::Error::msg)?;
    Ok(())
}
