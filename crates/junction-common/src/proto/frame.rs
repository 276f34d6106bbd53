//! Length-prefixed framing.
//!
//! Wire layout, all integers big-endian:
//!
//! ```text
//! +-----+-------+-------+----+------+
//! | LEN | MTYPE | IDLEN | ID | BODY |
//! +-----+-------+-------+----+------+
//!   4B     4B      4B    var   var
//! ```
//!
//! `LEN` counts everything after itself. The decoder works against a growing
//! [`BytesMut`]: [`can_decode`] peeks whether one whole frame is buffered and
//! [`decode`] consumes it. A buffer that grows past [`MAX_BUFFERED`] without
//! yielding a frame means the peers have desynchronized and the connection
//! must be dropped.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde_json::Value;

use crate::error::{JunctionError, Result};
use crate::proto::{Message, MsgType};

/// Desynchronization guard: drop the connection when this much data is
/// buffered without a decodable frame.
pub const MAX_BUFFERED: usize = 64 * 1024;

const LEN_FIELD: usize = 4;
const MTYPE_FIELD: usize = 4;
const IDLEN_FIELD: usize = 4;

/// Serialize one message into a single contiguous frame.
pub fn encode(msg: &Message) -> Result<Bytes> {
    let body = serde_json::to_vec(&msg.body())?;
    let id = msg.id().as_bytes();
    let total = MTYPE_FIELD + IDLEN_FIELD + id.len() + body.len();

    let mut out = BytesMut::with_capacity(LEN_FIELD + total);
    out.put_u32(total as u32);
    out.put_i32(msg.mtype().to_wire());
    out.put_u32(id.len() as u32);
    out.put_slice(id);
    out.put_slice(&body);
    Ok(out.freeze())
}

/// True when `buf` holds at least one complete frame.
pub fn can_decode(buf: &BytesMut) -> bool {
    if buf.len() < LEN_FIELD {
        return false;
    }
    let total = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
    buf.len() >= LEN_FIELD + total
}

/// Consume one frame from `buf` and build the message it carries.
///
/// Callers must have checked [`can_decode`] first. Fails when the id is not
/// ASCII, the body is not a JSON object, the type tag is unknown, or the
/// variant's schema check rejects the body.
pub fn decode(buf: &mut BytesMut) -> Result<Message> {
    let total = buf.get_u32() as usize;
    if total < MTYPE_FIELD + IDLEN_FIELD {
        return Err(JunctionError::Frame(format!(
            "frame length {total} shorter than fixed fields"
        )));
    }
    let mut frame = buf.split_to(total);

    let tag = frame.get_i32();
    let id_len = frame.get_u32() as usize;
    if id_len > frame.len() {
        return Err(JunctionError::Frame(format!(
            "id length {id_len} exceeds remaining frame of {}",
            frame.len()
        )));
    }
    let id_bytes = frame.split_to(id_len);
    if !id_bytes.is_ascii() {
        return Err(JunctionError::Frame("message id is not ASCII".into()));
    }
    let id = String::from_utf8(id_bytes.to_vec())
        .map_err(|_| JunctionError::Frame("message id is not valid UTF-8".into()))?;

    let mtype = MsgType::from_wire(tag).ok_or(JunctionError::MsgType(tag))?;
    let body: Value = serde_json::from_slice(&frame)?;
    Message::decode(mtype, id, &body)
}
