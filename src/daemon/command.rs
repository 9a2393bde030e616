/*!
 * Job Commands
 * Length-prefixed manifest text sent over the daemon control socket
 */

use std::io::{Read, Write};

use crate::core::limits::{COMMAND_PREFIX_SIZE, MANIFEST_SIZE_LIMIT};
use crate::core::{KernelError, KernelResult};

/// Read one `{u64 length}{manifest text}` command
pub fn read_command<R: Read>(reader: &mut R) -> KernelResult<String> {
    let mut prefix = [0u8; COMMAND_PREFIX_SIZE];
    reader
        .read_exact(&mut prefix)
        .map_err(|e| KernelError::io("read job command size", e))?;

    let len = u64::from_le_bytes(prefix);
    if len > MANIFEST_SIZE_LIMIT as u64 {
        return Err(KernelError::syntax(
            0,
            format!("job command of {} bytes exceeds the manifest size limit", len),
        ));
    }

    let len = len as usize;
    let mut body = Vec::new();
    body.try_reserve_exact(len)
        .map_err(|_| KernelError::OutOfMemory(format!("cannot allocate {} bytes for job", len)))?;
    body.resize(len, 0);
    reader
        .read_exact(&mut body)
        .map_err(|e| KernelError::io("read job command", e))?;

    String::from_utf8(body)
        .map_err(|e| KernelError::syntax(0, format!("job command is not utf-8: {}", e)))
}

/// Write one command; used by job submitters
pub fn write_command<W: Write>(writer: &mut W, manifest: &str) -> KernelResult<()> {
    if manifest.len() > MANIFEST_SIZE_LIMIT {
        return Err(KernelError::InvalidArgument(format!(
            "manifest of {} bytes exceeds the size limit",
            manifest.len()
        )));
    }
    writer
        .write_all(&(manifest.len() as u64).to_le_bytes())
        .and_then(|_| writer.write_all(manifest.as_bytes()))
        .and_then(|_| writer.flush())
        .map_err(|e| KernelError::io("write job command", e))
}
