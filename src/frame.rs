//! Blocking frame I/O on a byte stream.

use crate::error::Result;
use remctl_proto::{self as proto, HEADER_SIZE};
use std::io::{self, Read, Write};

/// Write one frame: flags, big-endian length, payload.
pub fn write_frame<W: Write>(stream: &mut W, flags: u8, payload: &[u8]) -> Result<()> {
    let frame = proto::encode(flags, payload)?;
    stream.write_all(&frame).map_err(deadline)?;
    stream.flush().map_err(deadline)?;
    Ok(())
}

/// Read one complete frame. Returns (flags, payload).
pub fn read_frame<R: Read>(stream: &mut R) -> Result<(u8, Vec<u8>)> {
    let mut header = [0u8; HEADER_SIZE];
    stream.read_exact(&mut header).map_err(deadline)?;
    let (flags, len) = proto::decode_header(&header)?;

    let mut payload = vec![0u8; len];
    stream.read_exact(&mut payload).map_err(deadline)?;
    Ok((flags, payload))
}

/// Socket deadlines surface as WouldBlock on Unix; report them as timeouts.
fn deadline(e: io::Error) -> io::Error {
    if e.kind() == io::ErrorKind::WouldBlock {
        io::Error::new(io::ErrorKind::TimedOut, "network timeout")
    } else {
        e
    }
}
