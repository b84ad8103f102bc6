// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Wire helpers for handing a producer's DMA-BUF pool to a consumer.
//!
//! The producer listens on one Unix stream socket per stream. On accept it
//! sends a `begin` message announcing the number of buffers, then one
//! `buffer` message per exported buffer carrying its fd as `SCM_RIGHTS`
//! ancillary data:
//!
//! ```text
//! {"type":"begin","buffers":4}
//! {"type":"buffer","buffer_index":0,"fourcc":875708993,"offset":0,"pitch":2560,"modifier":null}
//! ... one buffer message per slot, each with its fd
//! ```
//!
//! Every message is a little-endian `u32` byte length followed by that many
//! bytes of JSON. The fd is attached to the first byte of its message.

#![cfg(target_os = "linux")]

use std::io::{self, Read, Write};
use std::os::fd::{AsRawFd, BorrowedFd, FromRawFd, OwnedFd, RawFd};
use std::os::unix::net::UnixStream;

use serde_json::{json, Value};

/// Largest JSON body accepted in one message.
pub const MAX_MESSAGE_LEN: usize = 4096;

/// Largest pool a producer may export.
pub const MAX_BUFFERS: u32 = 64;

const LEN_PREFIX: usize = 4;

/// Layout of one exported buffer. Its fd travels beside it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferExport {
    /// Pool slot, matching `FrameHeader::buffer_index` on the frame channel.
    pub buffer_index: u32,
    /// DRM fourcc of the single plane.
    pub fourcc: u32,
    pub offset: u32,
    pub pitch: u32,
    pub modifier: Option<u64>,
}

impl BufferExport {
    fn to_json(self) -> Value {
        json!({
            "type": "buffer",
            "buffer_index": self.buffer_index,
            "fourcc": self.fourcc,
            "offset": self.offset,
            "pitch": self.pitch,
            "modifier": self.modifier,
        })
    }

    fn from_json(value: &Value) -> io::Result<Self> {
        expect_type(value, "buffer")?;
        let modifier = match value.get("modifier") {
            None | Some(Value::Null) => None,
            Some(modifier) => Some(
                modifier
                    .as_u64()
                    .ok_or_else(|| invalid("modifier is not an unsigned integer"))?,
            ),
        };
        Ok(Self {
            buffer_index: u32_field(value, "buffer_index")?,
            fourcc: u32_field(value, "fourcc")?,
            offset: u32_field(value, "offset")?,
            pitch: u32_field(value, "pitch")?,
            modifier,
        })
    }
}

/// A buffer as received by the consumer, which now owns the fd.
#[derive(Debug)]
pub struct ReceivedBuffer {
    pub export: BufferExport,
    pub fd: OwnedFd,
}

/// Producer side: send the whole pool over a freshly accepted connection.
pub fn send_buffers(
    stream: &UnixStream,
    buffers: &[(BufferExport, BorrowedFd<'_>)],
) -> io::Result<()> {
    if buffers.len() > MAX_BUFFERS as usize {
        return Err(invalid(format!(
            "{} buffers exceed the limit of {}",
            buffers.len(),
            MAX_BUFFERS
        )));
    }
    send_message(stream, &json!({ "type": "begin", "buffers": buffers.len() }), None)?;
    for (export, fd) in buffers {
        send_message(stream, &export.to_json(), Some(*fd))?;
    }
    Ok(())
}

/// Consumer side: receive the pool sent by [`send_buffers`].
///
/// Honours the stream's read timeout, if one is set.
pub fn receive_buffers(stream: &UnixStream) -> io::Result<Vec<ReceivedBuffer>> {
    let (begin, stray) = recv_message(stream)?;
    if stray.is_some() {
        return Err(invalid("begin message carries an fd"));
    }
    expect_type(&begin, "begin")?;
    let count = u32_field(&begin, "buffers")?;
    if count > MAX_BUFFERS {
        return Err(invalid(format!("{} buffers exceed the limit of {}", count, MAX_BUFFERS)));
    }

    let mut buffers = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let (message, fd) = recv_message(stream)?;
        let export = BufferExport::from_json(&message)?;
        let fd = fd.ok_or_else(|| {
            invalid(format!("buffer {} arrived without an fd", export.buffer_index))
        })?;
        buffers.push(ReceivedBuffer { export, fd });
    }
    Ok(buffers)
}

/// Send one length-prefixed JSON message, optionally passing `fd` with it.
pub fn send_message(
    stream: &UnixStream,
    message: &Value,
    fd: Option<BorrowedFd<'_>>,
) -> io::Result<()> {
    let body = serde_json::to_vec(message).map_err(io::Error::other)?;
    if body.len() > MAX_MESSAGE_LEN {
        return Err(invalid(format!("message of {} bytes is too long", body.len())));
    }
    let mut frame = Vec::with_capacity(LEN_PREFIX + body.len());
    frame.extend_from_slice(&(body.len() as u32).to_le_bytes());
    frame.extend_from_slice(&body);

    let sent = send_with_fd(stream, &frame, fd)?;
    let mut writer = stream;
    writer.write_all(&frame[sent..])
}

/// Receive one message and the fd passed with it, if any.
pub fn recv_message(stream: &UnixStream) -> io::Result<(Value, Option<OwnedFd>)> {
    let mut prefix = [0u8; LEN_PREFIX];
    let (received, fd) = recv_with_fd(stream, &mut prefix)?;
    if received == 0 {
        return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "peer closed the socket"));
    }

    let mut reader = stream;
    reader.read_exact(&mut prefix[received..])?;
    let len = u32::from_le_bytes(prefix) as usize;
    if len > MAX_MESSAGE_LEN {
        return Err(invalid(format!("message of {} bytes is too long", len)));
    }
    let mut body = vec![0u8; len];
    reader.read_exact(&mut body)?;

    let value = serde_json::from_slice(&body)
        .map_err(|e| invalid(format!("malformed message: {}", e)))?;
    Ok((value, fd))
}

/// Room for one `cmsghdr` carrying a single fd, suitably aligned.
type ControlBuffer = [u64; 4];

fn send_with_fd(
    stream: &UnixStream,
    bytes: &[u8],
    fd: Option<BorrowedFd<'_>>,
) -> io::Result<usize> {
    let mut control: ControlBuffer = [0; 4];
    let mut iov = libc::iovec {
        iov_base: bytes.as_ptr() as *mut libc::c_void,
        iov_len: bytes.len(),
    };
    // SAFETY: an all-zero msghdr is valid; every pointer set below outlives
    // the sendmsg call, and the control buffer is large and aligned enough
    // for one SCM_RIGHTS header (checked by the assertion).
    let sent = unsafe {
        let mut msg: libc::msghdr = std::mem::zeroed();
        msg.msg_iov = &mut iov;
        msg.msg_iovlen = 1;

        if let Some(fd) = fd {
            let space = libc::CMSG_SPACE(std::mem::size_of::<RawFd>() as u32) as usize;
            assert!(space <= std::mem::size_of::<ControlBuffer>());
            msg.msg_control = control.as_mut_ptr().cast();
            msg.msg_controllen = space as _;

            let cmsg = libc::CMSG_FIRSTHDR(&msg);
            (*cmsg).cmsg_level = libc::SOL_SOCKET;
            (*cmsg).cmsg_type = libc::SCM_RIGHTS;
            (*cmsg).cmsg_len = libc::CMSG_LEN(std::mem::size_of::<RawFd>() as u32) as _;
            std::ptr::write_unaligned(libc::CMSG_DATA(cmsg).cast::<RawFd>(), fd.as_raw_fd());
        }

        libc::sendmsg(stream.as_raw_fd(), &msg, libc::MSG_NOSIGNAL)
    };
    if sent < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(sent as usize)
}

fn recv_with_fd(stream: &UnixStream, buf: &mut [u8]) -> io::Result<(usize, Option<OwnedFd>)> {
    let mut control: ControlBuffer = [0; 4];
    let mut iov = libc::iovec {
        iov_base: buf.as_mut_ptr().cast(),
        iov_len: buf.len(),
    };
    // SAFETY: as in `send_with_fd`; the kernel writes at most
    // `msg_controllen` bytes of ancillary data into `control`.
    let (received, msg) = unsafe {
        let mut msg: libc::msghdr = std::mem::zeroed();
        msg.msg_iov = &mut iov;
        msg.msg_iovlen = 1;
        msg.msg_control = control.as_mut_ptr().cast();
        msg.msg_controllen = std::mem::size_of::<ControlBuffer>() as _;
        let received = libc::recvmsg(stream.as_raw_fd(), &mut msg, libc::MSG_CMSG_CLOEXEC);
        (received, msg)
    };
    if received < 0 {
        return Err(io::Error::last_os_error());
    }

    // Take ownership of every passed fd first so none leaks on error.
    let mut fds = Vec::new();
    // SAFETY: `msg` was filled by a successful recvmsg and `control` is still
    // alive; each SCM_RIGHTS payload holds `count` fds we now own.
    unsafe {
        let mut cmsg = libc::CMSG_FIRSTHDR(&msg);
        while !cmsg.is_null() {
            if (*cmsg).cmsg_level == libc::SOL_SOCKET && (*cmsg).cmsg_type == libc::SCM_RIGHTS {
                let data = libc::CMSG_DATA(cmsg).cast::<RawFd>();
                let payload = (*cmsg).cmsg_len as usize - libc::CMSG_LEN(0) as usize;
                for i in 0..payload / std::mem::size_of::<RawFd>() {
                    fds.push(OwnedFd::from_raw_fd(std::ptr::read_unaligned(data.add(i))));
                }
            }
            cmsg = libc::CMSG_NXTHDR(&msg, cmsg);
        }
    }

    if msg.msg_flags & libc::MSG_CTRUNC != 0 {
        return Err(invalid("ancillary data truncated"));
    }
    if fds.len() > 1 {
        return Err(invalid(format!("{} fds passed with one message", fds.len())));
    }
    Ok((received as usize, fds.pop()))
}

fn expect_type(value: &Value, wanted: &str) -> io::Result<()> {
    match value.get("type").and_then(Value::as_str) {
        Some(kind) if kind == wanted => Ok(()),
        other => Err(invalid(format!("expected a {} message, got {:?}", wanted, other))),
    }
}

fn u32_field(value: &Value, key: &str) -> io::Result<u32> {
    value
        .get(key)
        .and_then(Value::as_u64)
        .and_then(|n| u32::try_from(n).ok())
        .ok_or_else(|| invalid(format!("missing or invalid field {}", key)))
}

fn invalid(message: impl Into<String>) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, message.into())
}
