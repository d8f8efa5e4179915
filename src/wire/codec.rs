//! Length-framed binary codec for engine traffic
//!
//! Every message on the socket is a 4-byte little-endian length prefix
//! followed by the payload. Payloads start with a message kind and a
//! protocol version byte; fields the decoder does not know about are
//! trailing and ignored, so additive schema revisions keep decoding.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::protocol::{BallState, CarState, ControlOutput, GameTickSnapshot, Rotator, Vec3};

/// Current protocol revision carried in every payload
pub const PROTOCOL_VERSION: u8 = 1;

/// Upper bound on a single frame; a larger length prefix means the stream
/// is desynchronized beyond recovery for this connection
pub const MAX_FRAME_LEN: usize = 64 * 1024;

const LEN_PREFIX_BYTES: usize = 4;

/// Fixed control payload layout: kind, version, index, frame, five axes, flags
const CONTROL_BODY_LEN: usize = 2 + 1 + 4 + 5 * 4 + 1;

const FLAG_JUMP: u8 = 1 << 0;
const FLAG_BOOST: u8 = 1 << 1;
const FLAG_HANDBRAKE: u8 = 1 << 2;
const FLAG_USE_ITEM: u8 = 1 << 3;

/// Message kinds carried in the payload header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MsgKind {
    /// Engine -> agent per-tick snapshot
    GameTick = 1,
    /// Agent -> engine control response
    Control = 2,
}

impl MsgKind {
    fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::GameTick),
            2 => Some(Self::Control),
            _ => None,
        }
    }
}

/// Decode failures for a single frame
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("frame of {len} bytes exceeds maximum {max}")]
    FrameTooLarge { len: usize, max: usize },

    #[error("frame truncated reading {field}")]
    Truncated { field: &'static str },

    #[error("unknown message kind {0}")]
    UnknownKind(u8),

    #[error("expected {expected:?} message, got {got:?}")]
    UnexpectedKind { expected: MsgKind, got: MsgKind },

    #[error("{field} is not valid UTF-8")]
    InvalidString { field: &'static str },
}

/// Pull the next complete frame out of the read buffer
///
/// Returns `Ok(None)` until a whole frame has been buffered, so partial
/// reads across socket boundaries reassemble correctly.
/// `FrameTooLarge` is connection-fatal: the length prefix can no longer be
/// trusted and there is no way to find the next frame boundary.
pub fn extract_frame(buf: &mut BytesMut) -> Result<Option<Bytes>, DecodeError> {
    if buf.len() < LEN_PREFIX_BYTES {
        return Ok(None);
    }

    let len = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
    if len > MAX_FRAME_LEN {
        return Err(DecodeError::FrameTooLarge {
            len,
            max: MAX_FRAME_LEN,
        });
    }

    if buf.len() < LEN_PREFIX_BYTES + len {
        return Ok(None);
    }

    buf.advance(LEN_PREFIX_BYTES);
    Ok(Some(buf.split_to(len).freeze()))
}

/// Decode a game-tick snapshot payload
///
/// Reads the fields this revision knows about; trailing bytes from newer
/// schema revisions are ignored.
pub fn decode_snapshot(payload: &[u8]) -> Result<GameTickSnapshot, DecodeError> {
    let mut buf = payload;

    expect_kind(&mut buf, MsgKind::GameTick)?;
    let _version = take_u8(&mut buf, "protocol version")?;

    let player_index = take_u8(&mut buf, "player index")?;
    let team = take_u8(&mut buf, "team")?;

    let bot_type_len = take_u8(&mut buf, "bot type length")? as usize;
    let bot_type_bytes = take_slice(&mut buf, bot_type_len, "bot type")?;
    let bot_type = std::str::from_utf8(bot_type_bytes)
        .map_err(|_| DecodeError::InvalidString { field: "bot type" })?
        .to_string();

    let frame = take_u32(&mut buf, "frame")?;
    let game_time = take_f32(&mut buf, "game time")?;

    let car_count = take_u8(&mut buf, "car count")? as usize;
    let mut cars = Vec::with_capacity(car_count);
    for _ in 0..car_count {
        cars.push(CarState {
            index: take_u8(&mut buf, "car index")?,
            team: take_u8(&mut buf, "car team")?,
            position: take_vec3(&mut buf, "car position")?,
            rotation: take_rotator(&mut buf, "car rotation")?,
            velocity: take_vec3(&mut buf, "car velocity")?,
        });
    }

    let ball = BallState {
        position: take_vec3(&mut buf, "ball position")?,
        velocity: take_vec3(&mut buf, "ball velocity")?,
    };

    // Anything left over belongs to a newer schema revision.
    Ok(GameTickSnapshot {
        frame,
        game_time,
        player_index,
        team,
        bot_type,
        cars,
        ball,
    })
}

/// Encode a control response, length prefix included
///
/// Total for any well-formed output: fixed layout, never fails.
pub fn encode_control(index: u8, frame: u32, output: &ControlOutput) -> Bytes {
    let mut buf = BytesMut::with_capacity(LEN_PREFIX_BYTES + CONTROL_BODY_LEN);

    buf.put_u32_le(CONTROL_BODY_LEN as u32);
    buf.put_u8(MsgKind::Control as u8);
    buf.put_u8(PROTOCOL_VERSION);
    buf.put_u8(index);
    buf.put_u32_le(frame);

    buf.put_f32_le(output.steer);
    buf.put_f32_le(output.throttle);
    buf.put_f32_le(output.pitch);
    buf.put_f32_le(output.yaw);
    buf.put_f32_le(output.roll);

    let mut flags = 0u8;
    if output.jump {
        flags |= FLAG_JUMP;
    }
    if output.boost {
        flags |= FLAG_BOOST;
    }
    if output.handbrake {
        flags |= FLAG_HANDBRAKE;
    }
    if output.use_item {
        flags |= FLAG_USE_ITEM;
    }
    buf.put_u8(flags);

    buf.freeze()
}

/// Decode a control payload back into its parts
pub fn decode_control(payload: &[u8]) -> Result<(u8, u32, ControlOutput), DecodeError> {
    let mut buf = payload;

    expect_kind(&mut buf, MsgKind::Control)?;
    let _version = take_u8(&mut buf, "protocol version")?;

    let index = take_u8(&mut buf, "player index")?;
    let frame = take_u32(&mut buf, "frame")?;

    let steer = take_f32(&mut buf, "steer")?;
    let throttle = take_f32(&mut buf, "throttle")?;
    let pitch = take_f32(&mut buf, "pitch")?;
    let yaw = take_f32(&mut buf, "yaw")?;
    let roll = take_f32(&mut buf, "roll")?;
    let flags = take_u8(&mut buf, "flags")?;

    let output = ControlOutput {
        steer,
        throttle,
        pitch,
        yaw,
        roll,
        jump: flags & FLAG_JUMP != 0,
        boost: flags & FLAG_BOOST != 0,
        handbrake: flags & FLAG_HANDBRAKE != 0,
        use_item: flags & FLAG_USE_ITEM != 0,
    };

    Ok((index, frame, output))
}

fn expect_kind(buf: &mut &[u8], expected: MsgKind) -> Result<(), DecodeError> {
    let raw = take_u8(buf, "msg kind")?;
    let got = MsgKind::from_u8(raw).ok_or(DecodeError::UnknownKind(raw))?;
    if got != expected {
        return Err(DecodeError::UnexpectedKind { expected, got });
    }
    Ok(())
}

fn take_u8(buf: &mut &[u8], field: &'static str) -> Result<u8, DecodeError> {
    let (head, tail) = buf
        .split_first()
        .ok_or(DecodeError::Truncated { field })?;
    *buf = tail;
    Ok(*head)
}

fn take_slice<'a>(
    buf: &mut &'a [u8],
    len: usize,
    field: &'static str,
) -> Result<&'a [u8], DecodeError> {
    if buf.len() < len {
        return Err(DecodeError::Truncated { field });
    }
    let (head, tail) = buf.split_at(len);
    *buf = tail;
    Ok(head)
}

fn take_u32(buf: &mut &[u8], field: &'static str) -> Result<u32, DecodeError> {
    let b = take_slice(buf, 4, field)?;
    Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
}

fn take_f32(buf: &mut &[u8], field: &'static str) -> Result<f32, DecodeError> {
    let b = take_slice(buf, 4, field)?;
    Ok(f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
}

fn take_vec3(buf: &mut &[u8], field: &'static str) -> Result<Vec3, DecodeError> {
    Ok(Vec3 {
        x: take_f32(buf, field)?,
        y: take_f32(buf, field)?,
        z: take_f32(buf, field)?,
    })
}

fn take_rotator(buf: &mut &[u8], field: &'static str) -> Result<Rotator, DecodeError> {
    Ok(Rotator {
        pitch: take_f32(buf, field)?,
        yaw: take_f32(buf, field)?,
        roll: take_f32(buf, field)?,
    })
}

/// Build a snapshot payload the way the engine would, for tests
#[cfg(test)]
pub(crate) fn snapshot_body(snapshot: &GameTickSnapshot) -> BytesMut {
    let mut buf = BytesMut::new();

    buf.put_u8(MsgKind::GameTick as u8);
    buf.put_u8(PROTOCOL_VERSION);
    buf.put_u8(snapshot.player_index);
    buf.put_u8(snapshot.team);
    buf.put_u8(snapshot.bot_type.len() as u8);
    buf.extend_from_slice(snapshot.bot_type.as_bytes());
    buf.put_u32_le(snapshot.frame);
    buf.put_f32_le(snapshot.game_time);

    buf.put_u8(snapshot.cars.len() as u8);
    for car in &snapshot.cars {
        buf.put_u8(car.index);
        buf.put_u8(car.team);
        put_vec3(&mut buf, car.position);
        put_rotator(&mut buf, car.rotation);
        put_vec3(&mut buf, car.velocity);
    }

    put_vec3(&mut buf, snapshot.ball.position);
    put_vec3(&mut buf, snapshot.ball.velocity);

    buf
}

/// Frame a snapshot payload with its length prefix, for tests
#[cfg(test)]
pub(crate) fn encode_snapshot(snapshot: &GameTickSnapshot) -> Bytes {
    let body = snapshot_body(snapshot);
    let mut buf = BytesMut::with_capacity(LEN_PREFIX_BYTES + body.len());
    buf.put_u32_le(body.len() as u32);
    buf.extend_from_slice(&body);
    buf.freeze()
}

#[cfg(test)]
fn put_vec3(buf: &mut BytesMut, v: Vec3) {
    buf.put_f32_le(v.x);
    buf.put_f32_le(v.y);
    buf.put_f32_le(v.z);
}

#[cfg(test)]
fn put_rotator(buf: &mut BytesMut, r: Rotator) {
    buf.put_f32_le(r.pitch);
    buf.put_f32_le(r.yaw);
    buf.put_f32_le(r.roll);
}
