//! PSI (Pressure Stall Information) parser
//!
//! Format from /proc/pressure/{cpu,memory,io}:
//!   some avg10=5.23 avg60=3.45 avg300=2.11 total=123456
//!   full avg10=0.12 avg60=0.08 avg300=0.05 total=78901
//!
//! - "some" = at least one task stalled
//! - "full" = ALL non-idle tasks stalled at the same time
//! - "total" = cumulative stall time in microseconds
//!
//! Lines with other prefixes are skipped so newer kernels can add fields
//! without breaking the reader.

use std::env;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use crate::error::{PsiError, Result};
use crate::types::{PressureLine, PressureSnapshot, Resource};

/// procfs reports bogus sizes (0 or 4096), so reads never trust metadata and
/// stop at this many bytes.
const MAX_READ_BYTES: u64 = 1024 * 1024;

const FIELDS: [&str; 4] = ["avg10", "avg60", "avg300", "total"];

/// Resolve the pressure file for `resource` under `root`.
///
/// `PSIWATCH_<RESOURCE>_PATH` overrides the location of a single file.
pub fn psi_path(root: &Path, resource: Resource) -> PathBuf {
    let var = format!("PSIWATCH_{}_PATH", resource.as_str().to_uppercase());
    env::var_os(var)
        .map(PathBuf::from)
        .unwrap_or_else(|| root.join(resource.as_str()))
}

/// Read a whole pseudo-file without a stat call.
pub fn read_file_no_stat(path: &Path) -> Result<Vec<u8>> {
    let unavailable = |source| PsiError::Unavailable {
        path: path.to_path_buf(),
        source,
    };

    let file = File::open(path).map_err(unavailable)?;
    let mut content = Vec::new();
    file.take(MAX_READ_BYTES)
        .read_to_end(&mut content)
        .map_err(unavailable)?;
    Ok(content)
}

/// Parse raw file contents. Bytes that are not UTF-8 mean the file was read
/// fine but is not a pressure file, so they are a format error.
pub fn parse_snapshot_bytes(resource: Resource, raw: &[u8]) -> Result<PressureSnapshot> {
    let content = std::str::from_utf8(raw).map_err(|err| PsiError::Format {
        resource,
        line: String::from_utf8_lossy(raw).trim().to_string(),
        reason: format!("not valid UTF-8: {err}"),
    })?;
    parse_snapshot(resource, content)
}

/// Parse the contents of one pressure file.
pub fn parse_snapshot(resource: Resource, content: &str) -> Result<PressureSnapshot> {
    let mut some = None;
    let mut full = None;

    for line in content.lines() {
        let mut parts = line.split_whitespace();
        let slot = match parts.next() {
            Some("some") => &mut some,
            Some("full") => &mut full,
            _ => continue,
        };
        *slot = Some(parse_line(resource, line, parts)?);
    }

    let some = some.ok_or_else(|| PsiError::Format {
        resource,
        line: content.trim().to_string(),
        reason: "no \"some\" line".to_string(),
    })?;

    Ok(PressureSnapshot { some, full })
}

/// Fields must appear as `avg10 avg60 avg300 total`; anything after `total`
/// is ignored.
fn parse_line<'a>(
    resource: Resource,
    line: &str,
    mut parts: impl Iterator<Item = &'a str>,
) -> Result<PressureLine> {
    let malformed = |reason: String| PsiError::Format {
        resource,
        line: line.to_string(),
        reason,
    };

    let mut values = [""; 4];
    for (slot, expected) in values.iter_mut().zip(FIELDS) {
        let part = parts
            .next()
            .ok_or_else(|| malformed(format!("missing {expected}")))?;
        match part.split_once('=') {
            Some((key, value)) if key == expected => *slot = value,
            _ => return Err(malformed(format!("expected {expected}=<value>, got {part:?}"))),
        }
    }

    let avg = |idx: usize| {
        values[idx]
            .parse::<f64>()
            .map_err(|err| malformed(format!("{}: {err}", FIELDS[idx])))
    };

    Ok(PressureLine {
        avg10: avg(0)?,
        avg60: avg(1)?,
        avg300: avg(2)?,
        total: values[3]
            .parse::<u64>()
            .map_err(|err| malformed(format!("total: {err}")))?,
    })
}
