//! Wire-level behaviour, checked byte for byte over raw connections.

use anyhow::Result;

use crate::*;

#[tokio::test]
async fn test_literal_exchange() -> Result<()> {
    let reg = start_registry().await?;
    let mut c = RawConn::connect(reg.addr).await?;

    c.send(b"NAME\r\nalice\r\nCLIENT\r\n").await?;
    assert_eq!(c.bytes(5).await?, b"ACK\r\n");

    c.send(b"INFORM\r\nmovie.mp4\r\n3\r\n").await?;
    assert_eq!(c.bytes(5).await?, b"ACK\r\n");

    c.send(b"LIST\r\n").await?;
    let expected = b"REPLY\r\n1\r\nmovie.mp4\r\n";
    assert_eq!(c.bytes(expected.len()).await?, expected);

    c.send(b"QUERY\r\nmovie.mp4\r\n4\r\n").await?;
    let expected = b"REPLY\r\nCHUNK NOT EXIST\r\n";
    assert_eq!(c.bytes(expected.len()).await?, expected);

    c.send(b"FILESIZE\r\nmovie.mp4\r\n4096\r\nQUERYFILESIZE\r\nmovie.mp4\r\n")
        .await?;
    assert_eq!(c.bytes(5).await?, b"ACK\r\n");
    assert_eq!(c.bytes(6).await?, b"4096\r\n");

    c.send(b"EXIT\r\n").await?;
    assert_eq!(c.bytes(9).await?, b"GOODBYE\r\n");
    Ok(())
}

#[tokio::test]
async fn test_query_reports_owner_address() -> Result<()> {
    let reg = start_registry().await?;
    let mut owner = RawConn::register(reg.addr, "bob", "TRANSIENT").await?;
    owner.send(b"INFORM\r\nf.bin\r\n1\r\n").await?;
    owner.expect("ACK").await?;
    let owner_addr = reg
        .state
        .registry
        .peer("bob")
        .and_then(|e| e.relay)
        .map(|c| c.addr())
        .expect("bob has a relay");

    let mut asker = RawConn::connect(reg.addr).await?;
    asker.send(b"QUERY\r\nf.bin\r\n1\r\n").await?;
    asker.expect("REPLY").await?;
    asker.expect(&owner_addr.ip().to_string()).await?;
    asker.expect(&owner_addr.port().to_string()).await?;
    Ok(())
}

#[tokio::test]
async fn test_empty_registry_sentinels() -> Result<()> {
    let reg = start_registry().await?;
    let mut c = RawConn::connect(reg.addr).await?;

    c.send(b"LIST\r\n").await?;
    c.expect("REPLY").await?;
    c.expect("FILE LIST EMPTY").await?;

    c.send(b"QUERYFILESIZE\r\nnothing.bin\r\n").await?;
    c.expect("0").await?;

    c.send(b"QUERY\r\nnothing.bin\r\n1\r\n").await?;
    c.expect("REPLY").await?;
    c.expect("CHUNK NOT EXIST").await?;
    Ok(())
}

#[tokio::test]
async fn test_invalid_commands_do_not_end_session() -> Result<()> {
    let reg = start_registry().await?;
    let mut c = RawConn::connect(reg.addr).await?;

    c.send(b"HELLO\r\n").await?;
    c.expect("Invalid command").await?;

    // Known keyword, malformed number: whole message consumed.
    c.send(b"QUERY\r\nf.bin\r\nfirst\r\n").await?;
    c.expect("Invalid command").await?;

    c.send(b"NAME\r\nalice\r\nSERVER\r\n").await?;
    c.expect("Invalid command").await?;

    c.send(b"LIST\r\n").await?;
    c.expect("REPLY").await?;
    c.expect("FILE LIST EMPTY").await?;
    Ok(())
}

#[tokio::test]
async fn test_non_utf8_records_do_not_end_session() -> Result<()> {
    let reg = start_registry().await?;
    let mut c = RawConn::connect(reg.addr).await?;

    c.send(b"\xff\xfe\r\n").await?;
    c.expect("Invalid command").await?;

    c.send(b"QUERY\r\nf\xffbin\r\n1\r\nLIST\r\n").await?;
    c.expect("Invalid command").await?;
    c.expect("REPLY").await?;
    c.expect("FILE LIST EMPTY").await?;
    Ok(())
}

#[tokio::test]
async fn test_bare_newline_is_tolerated() -> Result<()> {
    let reg = start_registry().await?;
    let mut c = RawConn::connect(reg.addr).await?;
    c.send(b"NAME\nalice\nCLIENT\nLIST\n").await?;
    c.expect("ACK").await?;
    c.expect("REPLY").await?;
    c.expect("FILE LIST EMPTY").await?;
    Ok(())
}

#[tokio::test]
async fn test_commands_split_across_writes() -> Result<()> {
    let reg = start_registry().await?;
    let mut c = RawConn::connect(reg.addr).await?;
    c.send(b"NAME\r\nal").await?;
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    c.send(b"ice\r\nCLI").await?;
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    c.send(b"ENT\r\n").await?;
    c.expect("ACK").await?;
    assert!(reg.state.registry.peer("alice").is_some());
    Ok(())
}

#[tokio::test]
async fn test_precondition_errors() -> Result<()> {
    let reg = start_registry().await?;
    let mut c = RawConn::connect(reg.addr).await?;

    c.send(b"INFORM\r\nf.bin\r\n1\r\n").await?;
    c.expect("Not registered").await?;
    c.send(b"DOWNLOAD\r\nf.bin\r\n1\r\n").await?;
    c.expect("Not registered").await?;
    c.send(b"UPLOAD\r\nalice\r\n").await?;
    c.expect("Not registered").await?;

    c.send(b"NAME\r\nbob\r\nCLIENT\r\n").await?;
    c.expect("ACK").await?;
    c.send(b"NAME\r\nbob\r\nTRANSIENT\r\n").await?;
    c.expect("Already registered").await?;
    assert!(reg.state.registry.peer("bob").and_then(|e| e.relay).is_none());
    Ok(())
}

#[tokio::test]
async fn test_overlong_record_drops_connection() -> Result<()> {
    let reg = start_registry_with(TransferSettings {
        max_record_len: 64,
        ..TransferSettings::default()
    })
    .await?;
    let mut c = RawConn::register(reg.addr, "bob", "CLIENT").await?;
    let long = format!("INFORM\r\n{}\r\n1\r\n", "x".repeat(200));
    c.send(long.as_bytes()).await?;

    let closed = tokio::time::timeout(std::time::Duration::from_secs(5), c.reader.next_record()).await?;
    // EOF or reset, depending on how much of the record the registry left unread.
    assert!(!matches!(closed, Ok(Some(_))));
    wait_until(5, || reg.state.registry.peer("bob").is_none()).await?;
    Ok(())
}
