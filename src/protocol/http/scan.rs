//! Line scanning across the ring's wrap boundary.

use memchr::memchr;

use crate::core::{ByteRing, RingView};
use crate::error::{Error, Result};

/// Length of the first buffered line, `\n` included.
pub(crate) fn line_length(view: RingView<'_>) -> Option<usize> {
    let (first, second) = view.segments();
    match memchr(b'\n', first) {
        Some(at) => Some(at + 1),
        None => memchr(b'\n', second).map(|at| first.len() + at + 1),
    }
}

/// Moves one complete line out of `inbound` into `line`, minus its `\r\n`.
///
/// Returns `Ok(false)` while the terminator has not arrived. A full ring with
/// no terminator can never complete and is a framing error.
pub(crate) fn take_line(inbound: &mut ByteRing, line: &mut Vec<u8>) -> Result<bool> {
    let Some(length) = line_length(inbound.view()) else {
        if inbound.remaining() == 0 {
            return Err(Error::framing(format!(
                "no line terminator within {} bytes",
                inbound.capacity()
            )));
        }
        return Ok(false);
    };

    line.clear();
    line.resize(length, 0);
    inbound.read(line)?;

    line.pop();
    if line.last() == Some(&b'\r') {
        line.pop();
    }
    Ok(true)
}
