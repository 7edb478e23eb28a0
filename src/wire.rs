//! On-wire layout: a fixed 24-byte header —
//! `{ type:u32, source:i32, target:i32, block_id:i32, position:i32, size:i32 }`
//! — in big-endian, followed by exactly `size` payload bytes. No message is
//! ever retained past one send/receive, so there is no versioning concern
//! and no framing crate is warranted for six fixed-width integers (see
//! DESIGN.md).

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{DsmError, Result};
use crate::message::{Envelope, Message, MessageKind};

pub const HEADER_LEN: usize = 6 * 4;

fn io_err(peer: u32, e: std::io::Error) -> DsmError {
    DsmError::Communication {
        peer,
        reason: e.to_string(),
    }
}

fn payload_of(message: &Message) -> (u32, u32, &[u8]) {
    match message {
        Message::WriteReq { position, data, .. } => (*position, data.len() as u32, data.as_slice()),
        Message::ReadResp { data, .. } => (0, data.len() as u32, data.as_slice()),
        _ => (0, 0, &[]),
    }
}

pub async fn write_frame<W: AsyncWrite + Unpin>(w: &mut W, env: &Envelope) -> Result<()> {
    let (position, size, payload) = payload_of(&env.message);
    let mut header = [0u8; HEADER_LEN];
    header[0..4].copy_from_slice(&(env.message.kind() as u32).to_be_bytes());
    header[4..8].copy_from_slice(&(env.source as i32).to_be_bytes());
    header[8..12].copy_from_slice(&(env.target as i32).to_be_bytes());
    header[12..16].copy_from_slice(&(env.message.block_id() as i32).to_be_bytes());
    header[16..20].copy_from_slice(&(position as i32).to_be_bytes());
    header[20..24].copy_from_slice(&(size as i32).to_be_bytes());

    w.write_all(&header).await.map_err(|e| io_err(env.target, e))?;
    if !payload.is_empty() {
        w.write_all(payload).await.map_err(|e| io_err(env.target, e))?;
    }
    w.flush().await.map_err(|e| io_err(env.target, e))?;
    Ok(())
}

pub async fn read_frame<R: AsyncRead + Unpin>(r: &mut R, local_rank: u32) -> Result<Envelope> {
    let mut header = [0u8; HEADER_LEN];
    r.read_exact(&mut header)
        .await
        .map_err(|e| io_err(local_rank, e))?;

    let kind_raw = u32::from_be_bytes(header[0..4].try_into().unwrap());
    let source = i32::from_be_bytes(header[4..8].try_into().unwrap()) as u32;
    let _target = i32::from_be_bytes(header[8..12].try_into().unwrap()) as u32;
    let block_id = i32::from_be_bytes(header[12..16].try_into().unwrap()) as u32;
    let position = i32::from_be_bytes(header[16..20].try_into().unwrap()) as u32;
    let size = i32::from_be_bytes(header[20..24].try_into().unwrap()) as u32;

    let kind = MessageKind::from_u32(kind_raw).ok_or_else(|| DsmError::Communication {
        peer: source,
        reason: format!("unknown message type {kind_raw} on wire"),
    })?;

    let mut data = vec![0u8; size as usize];
    if size > 0 {
        r.read_exact(&mut data)
            .await
            .map_err(|e| io_err(local_rank, e))?;
    }

    let message = match kind {
        MessageKind::ReadReq => Message::ReadReq { block_id },
        MessageKind::ReadResp => Message::ReadResp { block_id, data },
        MessageKind::WriteReq => Message::WriteReq {
            block_id,
            position,
            data,
        },
        MessageKind::WriteResp => Message::WriteResp { block_id },
        MessageKind::Invalidate => Message::Invalidate { block_id },
        MessageKind::InvalidateAck => Message::InvalidateAck { block_id },
    };

    Ok(Envelope::new(source, local_rank, message))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[tokio::test]
    async fn round_trips_a_write_req() {
        let env = Envelope::new(
            2,
            0,
            Message::WriteReq {
                block_id: 5,
                position: 3,
                data: vec![1, 2, 3, 4],
            },
        );
        let mut buf = Vec::new();
        write_frame(&mut buf, &env).await.unwrap();

        let mut cursor = Cursor::new(buf);
        let decoded = read_frame(&mut cursor, 0).await.unwrap();
        assert_eq!(decoded.source, 2);
        match decoded.message {
            Message::WriteReq {
                block_id,
                position,
                data,
            } => {
                assert_eq!(block_id, 5);
                assert_eq!(position, 3);
                assert_eq!(data, vec![1, 2, 3, 4]);
            }
            other => panic!("unexpected message {other:?}"),
        }
    }

    #[tokio::test]
    async fn zero_size_messages_carry_no_payload() {
        let env = Envelope::new(1, 0, Message::InvalidateAck { block_id: 9 });
        let mut buf = Vec::new();
        write_frame(&mut buf, &env).await.unwrap();
        assert_eq!(buf.len(), HEADER_LEN);
    }
}
