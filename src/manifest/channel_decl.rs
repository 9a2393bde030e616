/*!
 * Channel Declarations
 * Grammar of `Channel = name,alias,type,gets,getsize,puts,putsize` records
 */

use crate::channels::{AccessType, Channel, Protocol, Quota};
use crate::core::limits::{MANIFEST_TOKENS_LIMIT, NAME_PREFIX_NET};
use crate::core::{KernelError, KernelResult};

const CURRENT_TOKENS: usize = 7;
const DEPRECATED_TOKENS: usize = 8;

/// Which record grammar a channel line used
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordFormat {
    Current,
    /// Extra checksum field after the type; its value is ignored
    Deprecated,
}

/// Parse one channel record
pub fn parse_channel(value: &str, line: usize) -> KernelResult<(RecordFormat, Channel)> {
    let tokens: Vec<&str> = value
        .splitn(MANIFEST_TOKENS_LIMIT, ',')
        .map(str::trim)
        .collect();
    let (format, limits_at) = match tokens.len() {
        CURRENT_TOKENS => (RecordFormat::Current, 3),
        DEPRECATED_TOKENS => (RecordFormat::Deprecated, 4),
        n => {
            return Err(KernelError::syntax(
                line,
                format!("invalid channel tokens number {}", n),
            ))
        }
    };

    let (protocol, name) = parse_name(tokens[0])?;
    let alias = tokens[1];
    if alias.is_empty() {
        return Err(KernelError::syntax(line, "empty channel alias"));
    }
    let access = AccessType::try_from(parse_int(tokens[2])?)?;

    let mut limits = [0i64; 4];
    for (limit, token) in limits.iter_mut().zip(&tokens[limits_at..]) {
        *limit = parse_int(token)?;
        if *limit < 0 {
            return Err(KernelError::semantic(format!("negative limits for {}", alias)));
        }
    }

    Ok((
        format,
        Channel::new(alias, name, protocol, access, Quota::from_array(limits)),
    ))
}

/// Absolute host path, or the residue of an opaque network name
fn parse_name(token: &str) -> KernelResult<(Protocol, String)> {
    if token.starts_with('/') {
        return Ok((Protocol::Regular, token.to_string()));
    }
    let rest = token.strip_prefix(NAME_PREFIX_NET).ok_or_else(|| {
        KernelError::semantic(format!(
            "only absolute path channels are allowed, got '{}'",
            token
        ))
    })?;
    // one separator character follows the prefix
    let residue = rest
        .chars()
        .next()
        .map_or("", |c| &rest[c.len_utf8()..]);
    Ok((Protocol::Opaque, residue.to_string()))
}

/// Integer with C `strtoll(…, 0)` rules and no trailing characters
///
/// Accepts an optional sign, then `0x` hex, a leading-`0` octal or decimal.
pub fn parse_int(token: &str) -> KernelResult<i64> {
    let invalid = || KernelError::semantic(format!("invalid numeric value '{}'", token));
    let trimmed = token.trim();
    if trimmed.is_empty() {
        return Err(KernelError::semantic("empty numeric value"));
    }

    let (negative, unsigned) = match trimmed.as_bytes()[0] {
        b'-' => (true, &trimmed[1..]),
        b'+' => (false, &trimmed[1..]),
        _ => (false, trimmed),
    };
    let (radix, digits) = if let Some(hex) = unsigned
        .strip_prefix("0x")
        .or_else(|| unsigned.strip_prefix("0X"))
    {
        (16, hex)
    } else if unsigned.len() > 1 && unsigned.starts_with('0') {
        (8, &unsigned[1..])
    } else {
        (10, unsigned)
    };
    if digits.is_empty() || !digits.chars().all(|c| c.is_digit(radix)) {
        return Err(invalid());
    }

    let magnitude = u64::from_str_radix(digits, radix).map_err(|_| invalid())?;
    if negative {
        if magnitude > i64::MAX as u64 + 1 {
            return Err(invalid());
        }
        Ok((magnitude as i64).wrapping_neg())
    } else {
        i64::try_from(magnitude).map_err(|_| invalid())
    }
}
