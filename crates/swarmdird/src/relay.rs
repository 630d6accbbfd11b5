//! Relay path: DOWNLOAD dispatch and UPLOAD forwarding.
//!
//! A DOWNLOAD picks an owner, takes that owner's send-turn, parks it with a
//! ticket and writes the instruction to the owner's relay connection. The
//! owner's relay answers with UPLOAD + DATA frame on its own session, which
//! forwards the frame to the requester's control connection and then drops
//! the turn. Payload bytes pass through a fixed buffer and are never
//! collected.

use tokio::io::{AsyncBufRead, AsyncReadExt, AsyncWriteExt};

use swarmdir_core::wire::{DataHeader, Instruction};
use swarmdir_core::{Chunk, CodecError, ErrorReply, RecordReader, Reply};
use swarmdir_services::{PeerConnection, RelayTicket};

use crate::server::RegistryState;

const COPY_BUF: usize = 8 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadOutcome {
    /// Instruction written; the DATA frame follows later.
    Dispatched,
    NotExist,
    RelayUnavailable,
}

#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("owner relay stream failed: {0}")]
    Owner(#[from] CodecError),
    #[error("DATA frame of {len} bytes exceeds chunk size {max}")]
    Oversized { len: u32, max: u32 },
    #[error("relay copy timed out")]
    TimedOut,
}

/// Send `chunk` to `requester` by way of a random owner's relay.
pub async fn start_download(state: &RegistryState, requester: &str, chunk: Chunk) -> DownloadOutcome {
    let Some(owner) = state.registry.pick_owner(&chunk.filename, chunk.number) else {
        return DownloadOutcome::NotExist;
    };
    let Some(relay) = owner.relay.clone() else {
        tracing::warn!(owner = %owner.name, %chunk, "owner has no relay connection");
        return DownloadOutcome::RelayUnavailable;
    };

    let timeout = state.settings.send_turn_timeout;
    let permit = match owner.send_turn.acquire(timeout).await {
        Ok(p) => p,
        Err(e) => {
            tracing::warn!(owner = %owner.name, %chunk, error = %e, "send turn unavailable");
            return DownloadOutcome::RelayUnavailable;
        }
    };

    let instruction = Instruction::Download {
        chunk: chunk.clone(),
        requester: requester.to_string(),
    };
    let bytes = match instruction.encode() {
        Ok(b) => b,
        Err(e) => {
            tracing::warn!(%chunk, error = %e, "cannot encode DOWNLOAD instruction");
            return DownloadOutcome::RelayUnavailable;
        }
    };

    let ticket = RelayTicket {
        chunk: chunk.clone(),
        requester: requester.to_string(),
    };
    let hand_off = owner.send_turn.hand_off(permit, ticket);

    {
        let turn = owner.send_turn.clone();
        let owner_name = owner.name.clone();
        let registry = state.registry.clone();
        let requester = requester.to_string();
        tokio::spawn(async move {
            let reason = tokio::select! {
                _ = tokio::time::sleep(timeout) => "relay never uploaded",
                _ = turn.closed() => "owner left",
            };
            if !turn.expire(hand_off) {
                return;
            }
            tracing::warn!(owner = %owner_name, %requester, reason, "send turn reclaimed");
            // Uploads only consume a ticket naming their own target, so nothing
            // else will answer this requester.
            if let Some(conn) = registry.peer(&requester).and_then(|e| e.control) {
                let _ = conn
                    .send(&Reply::Error(ErrorReply::RelayUnavailable).encode())
                    .await;
            }
        });
    }

    if let Err(e) = relay.send(&bytes).await {
        tracing::warn!(owner = %owner.name, %chunk, error = %e, "failed to write DOWNLOAD instruction");
        owner.send_turn.expire(hand_off);
        return DownloadOutcome::RelayUnavailable;
    }
    tracing::debug!(owner = %owner.name, requester, %chunk, "download dispatched");
    DownloadOutcome::Dispatched
}

enum Forwarded {
    Delivered,
    TargetGone,
    TargetFailed,
}

/// Handle UPLOAD from `owner`'s relay session: ACK, read one DATA frame and
/// forward it to `target`'s control connection.
///
/// The frame is forwarded only if the owner's parked ticket names `target`
/// and the same chunk. Anything else is drained, and the ticket stays parked
/// for the upload it belongs to.
///
/// An `Err` means the owner's stream is no longer in sync and its session
/// must close.
pub async fn relay_upload<R: AsyncBufRead + Unpin>(
    state: &RegistryState,
    owner: &str,
    reader: &mut RecordReader<R>,
    owner_conn: &PeerConnection,
    target: &str,
) -> Result<(), RelayError> {
    owner_conn
        .send(&Reply::Ack.encode())
        .await
        .map_err(CodecError::from)?;
    let header = reader.read_data_header().await?;

    let turn = state.registry.peer(owner).map(|e| e.send_turn);
    let in_flight = turn.as_ref().and_then(|t| {
        t.take_if(|ticket| ticket.requester == target && ticket.chunk == header.chunk)
    });
    if in_flight.is_none() {
        match turn.as_ref().and_then(|t| t.pending()) {
            Some(ticket) => tracing::warn!(
                owner,
                target,
                chunk = %header.chunk,
                expected = %ticket.requester,
                expected_chunk = %ticket.chunk,
                "UPLOAD does not match the pending DOWNLOAD; discarding"
            ),
            None => tracing::debug!(owner, target, "UPLOAD without a pending DOWNLOAD"),
        }
    }

    let target_conn = match &in_flight {
        Some(_) => state.registry.peer(target).and_then(|e| e.control),
        None => None,
    };

    let result = forward_frame(state, reader, &header, target_conn.as_ref()).await;
    match &result {
        Ok(Forwarded::Delivered) => tracing::debug!(owner, target, "chunk relayed"),
        Ok(Forwarded::TargetGone) => {
            if in_flight.is_some() {
                tracing::debug!(owner, target, "relay target gone; payload discarded");
            }
        }
        Ok(Forwarded::TargetFailed) => {
            tracing::warn!(owner, target, "write to relay target failed");
            if let Some(t) = &target_conn {
                t.close();
            }
        }
        Err(e) => {
            tracing::warn!(owner, target, error = %e, "relay aborted");
            // Target holds a truncated frame, or is still waiting for one.
            if let Some(t) = &target_conn {
                t.close();
            }
        }
    }
    drop(in_flight);
    result.map(|_| ())
}

async fn forward_frame<R: AsyncBufRead + Unpin>(
    state: &RegistryState,
    reader: &mut RecordReader<R>,
    header: &DataHeader,
    target: Option<&PeerConnection>,
) -> Result<Forwarded, RelayError> {
    let max = state.settings.chunk_size;
    if header.len > max {
        return Err(RelayError::Oversized {
            len: header.len,
            max,
        });
    }

    tokio::time::timeout(state.settings.send_turn_timeout, copy_payload(reader, header, target))
        .await
        .map_err(|_| RelayError::TimedOut)?
}

async fn copy_payload<R: AsyncBufRead + Unpin>(
    reader: &mut RecordReader<R>,
    header: &DataHeader,
    target: Option<&PeerConnection>,
) -> Result<Forwarded, RelayError> {
    let header_bytes = header.encode().map_err(CodecError::from)?;
    let mut outcome = Forwarded::Delivered;
    let mut sink = match target {
        Some(t) => Some(t.lock_writer().await),
        None => {
            outcome = Forwarded::TargetGone;
            None
        }
    };
    if let Some(w) = sink.as_mut() {
        if w.write_all(&header_bytes).await.is_err() {
            sink = None;
            outcome = Forwarded::TargetFailed;
        }
    }

    let src = reader.get_mut();
    let mut buf = vec![0u8; COPY_BUF.min(header.len as usize).max(1)];
    let mut remaining = header.len as usize;
    while remaining > 0 {
        let want = remaining.min(buf.len());
        let n = src.read(&mut buf[..want]).await.map_err(CodecError::from)?;
        if n == 0 {
            return Err(CodecError::UnexpectedEof.into());
        }
        remaining -= n;
        if let Some(w) = sink.as_mut() {
            if w.write_all(&buf[..n]).await.is_err() {
                // Keep draining the owner so its stream stays in sync.
                sink = None;
                outcome = Forwarded::TargetFailed;
            }
        }
    }
    if let Some(w) = sink.as_mut() {
        if w.flush().await.is_err() {
            outcome = Forwarded::TargetFailed;
        }
    }
    Ok(outcome)
}
