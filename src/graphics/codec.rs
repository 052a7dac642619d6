//! Native handle transport over a stream socket.
//!
//! An envelope is a `BufferInfo`, the handle header and one `i32` slot per
//! descriptor and integer. Descriptor slots only hold placeholders, the
//! descriptors themselves travel as `SCM_RIGHTS` ancillary data attached to
//! the same message.

use super::buffer::{
    BUFFER_INFO_SIZE, BufferHandle, BufferInfo, HANDLE_HEADER_SIZE,
    MAX_NUM_FDS, MAX_NUM_INTS, SYNC_BYTE, read_i32,
};
use crate::errors::ProtocolError;
use log::trace;
use nix::sys::socket::{ControlMessage, MsgFlags, sendmsg};
use std::io::{IoSlice, Read, Write};
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::os::unix::net::UnixStream;

/// A decoded envelope.
#[derive(Debug)]
pub struct Frame {
    pub info: BufferInfo,
    pub handle: BufferHandle,
}

pub fn envelope_size(fds: usize, ints: usize) -> usize {
    BUFFER_INFO_SIZE + HANDLE_HEADER_SIZE + 4 * (fds + ints)
}

pub(crate) fn encode_envelope(info: &BufferInfo, handle: &BufferHandle) -> Vec<u8> {
    let mut payload =
        Vec::with_capacity(envelope_size(handle.num_fds(), handle.num_ints()));
    payload.extend_from_slice(&info.to_bytes());
    for value in [
        handle.version(),
        handle.num_fds() as i32,
        handle.num_ints() as i32,
    ] {
        payload.extend_from_slice(&value.to_ne_bytes());
    }
    for fd in handle.fds() {
        payload.extend_from_slice(&fd.as_raw_fd().to_ne_bytes());
    }
    for value in handle.ints() {
        payload.extend_from_slice(&value.to_ne_bytes());
    }
    payload
}

fn check_counts(fds: i64, ints: i64) -> Result<(), ProtocolError> {
    if fds < 0 || fds as usize > MAX_NUM_FDS {
        return Err(ProtocolError::Oversized {
            kind: "fds",
            count: fds,
            max: MAX_NUM_FDS,
        });
    }
    if ints < 0 || ints as usize > MAX_NUM_INTS {
        return Err(ProtocolError::Oversized {
            kind: "ints",
            count: ints,
            max: MAX_NUM_INTS,
        });
    }
    Ok(())
}

/// Sends one envelope with the handle's descriptors attached.
pub fn send_native_handle(
    stream: &UnixStream,
    info: &BufferInfo,
    handle: &BufferHandle,
) -> Result<(), ProtocolError> {
    check_counts(handle.num_fds() as i64, handle.num_ints() as i64)?;
    let payload = encode_envelope(info, handle);
    let fds: Vec<RawFd> = handle.fds().iter().map(|fd| fd.as_raw_fd()).collect();
    let rights = [ControlMessage::ScmRights(&fds)];
    let cmsgs: &[ControlMessage] = if fds.is_empty() { &[] } else { &rights };

    let sent = sendmsg::<()>(
        stream.as_raw_fd(),
        &[IoSlice::new(&payload)],
        cmsgs,
        MsgFlags::MSG_NOSIGNAL,
        None,
    )?;
    // The descriptors went with the first chunk, the rest is plain data
    if sent < payload.len() {
        (&*stream).write_all(&payload[sent..])?;
    }
    Ok(())
}

/// Writes the sync byte, both counts and the envelope: one complete frame.
pub fn send_frame(
    stream: &UnixStream,
    info: &BufferInfo,
    handle: &BufferHandle,
) -> Result<(), ProtocolError> {
    check_counts(handle.num_fds() as i64, handle.num_ints() as i64)?;
    (&*stream).write_all(&[
        SYNC_BYTE,
        handle.num_fds() as u8,
        handle.num_ints() as u8,
    ])?;
    send_native_handle(stream, info, handle)
}

/// Blocks until the server hands the buffer slot back.
pub fn wait_for_ack(stream: &UnixStream) -> Result<u8, ProtocolError> {
    let mut ack = [0u8; 1];
    read_exact(stream, &mut ack)?;
    Ok(ack[0])
}

pub(crate) fn read_exact(
    stream: &UnixStream,
    buf: &mut [u8],
) -> Result<(), ProtocolError> {
    match (&*stream).read_exact(buf) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            Err(ProtocolError::Disconnected)
        }
        Err(e) => Err(e.into()),
    }
}

/**
 * Receives one envelope announced with `fds` descriptors and `ints`
 * integers.
 *
 * The ancillary buffer has room for exactly `fds` descriptors. Any
 * descriptor that arrives is owned from that point on, so every rejection
 * below closes whatever was received.
 */
pub fn recv_native_handle(
    stream: &UnixStream,
    fds: usize,
    ints: usize,
) -> Result<Frame, ProtocolError> {
    check_counts(fds as i64, ints as i64)?;

    let expected = envelope_size(fds, ints);
    let mut payload = vec![0u8; expected];
    let (got, received, truncated) = recvmsg_with_fds(stream, &mut payload, fds)?;

    if truncated {
        return Err(ProtocolError::ControlTruncated);
    }
    if got == 0 {
        return Err(ProtocolError::Disconnected);
    }
    if got < expected {
        return Err(ProtocolError::Truncated { got, expected });
    }

    let mut info_bytes = [0u8; BUFFER_INFO_SIZE];
    info_bytes.copy_from_slice(&payload[..BUFFER_INFO_SIZE]);
    let info = BufferInfo::from_bytes(&info_bytes);

    let header = &payload[BUFFER_INFO_SIZE..BUFFER_INFO_SIZE + HANDLE_HEADER_SIZE];
    let version = read_i32(&header[0..]);
    let num_fds = read_i32(&header[4..]);
    let num_ints = read_i32(&header[8..]);
    check_counts(num_fds as i64, num_ints as i64)?;

    if num_fds as usize != fds || num_ints as usize != ints {
        return Err(ProtocolError::CountMismatch {
            declared_fds: fds,
            declared_ints: ints,
            fds: num_fds as usize,
            ints: num_ints as usize,
        });
    }
    if received.len() != fds {
        return Err(ProtocolError::DescriptorCount {
            got: received.len(),
            expected: fds,
        });
    }

    let ints_start = BUFFER_INFO_SIZE + HANDLE_HEADER_SIZE + 4 * fds;
    let values = payload[ints_start..expected]
        .chunks_exact(4)
        .map(read_i32)
        .collect();

    trace!(
        "Received handle for '{}' with {} fds and {} ints",
        info.layer_name, fds, ints
    );
    Ok(Frame {
        info,
        handle: BufferHandle::with_version(version, received, values),
    })
}

/// `recvmsg` waiting for the full payload. Returns the byte count, the
/// descriptors that arrived and whether the kernel truncated the control
/// data.
fn recvmsg_with_fds(
    stream: &UnixStream,
    payload: &mut [u8],
    fds: usize,
) -> Result<(usize, Vec<OwnedFd>, bool), ProtocolError> {
    #[allow(unused_unsafe)]
    let space =
        unsafe { libc::CMSG_SPACE((fds * size_of::<RawFd>()) as u32) } as usize;
    let mut control = vec![0u8; space];

    let mut iov = libc::iovec {
        iov_base: payload.as_mut_ptr().cast(),
        iov_len: payload.len(),
    };
    let mut msg: libc::msghdr = unsafe { std::mem::zeroed() };
    msg.msg_iov = &mut iov;
    msg.msg_iovlen = 1;
    msg.msg_control = control.as_mut_ptr().cast();
    msg.msg_controllen = space as _;

    let ret = unsafe {
        libc::recvmsg(
            stream.as_raw_fd(),
            &mut msg,
            libc::MSG_CMSG_CLOEXEC | libc::MSG_WAITALL,
        )
    };
    if ret < 0 {
        return Err(std::io::Error::last_os_error().into());
    }

    let mut received = Vec::new();
    // SAFETY: msg describes `control`, which the kernel just filled in
    unsafe {
        let mut cmsg = libc::CMSG_FIRSTHDR(&msg);
        while !cmsg.is_null() {
            if (*cmsg).cmsg_level == libc::SOL_SOCKET
                && (*cmsg).cmsg_type == libc::SCM_RIGHTS
            {
                let data = libc::CMSG_DATA(cmsg) as *const RawFd;
                let len = (*cmsg).cmsg_len as usize - libc::CMSG_LEN(0) as usize;
                for i in 0..len / size_of::<RawFd>() {
                    let fd = std::ptr::read_unaligned(data.add(i));
                    received.push(OwnedFd::from_raw_fd(fd));
                }
            }
            cmsg = libc::CMSG_NXTHDR(&msg, cmsg);
        }
    }

    let truncated = msg.msg_flags & libc::MSG_CTRUNC != 0;
    Ok((ret as usize, received, truncated))
}
