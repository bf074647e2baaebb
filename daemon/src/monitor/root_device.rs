/// Resolution of the block device that backs the running live system.
///
/// On a live system `/` is an overlay, so the device is looked up at the live
/// medium mount point first and only then at `/`.  The result is the bare
/// kernel name (`sdb1`), optionally reduced to its whole disk (`sdb`) through
/// sysfs.
use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::ResolveError;

pub const PROC_MOUNTS: &str = "/proc/self/mounts";
pub const SYS_CLASS_BLOCK: &str = "/sys/class/block";

/// Kernel name of the root device, e.g. `sdb`.  Resolved once, never changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RootDeviceRef(String);

impl RootDeviceRef {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn id(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RootDeviceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A `(mount point, device name)` pair from the mount table.
#[derive(Debug, Clone)]
pub struct MountEntry {
    pub mount_point: PathBuf,
    pub device: String,
}

/// Resolves the root device from the kernel's mount table.
///
/// The table is read from procfs directly: `/run/...` and `iso9660` mounts,
/// which is where live media end up, are filtered out of most disk listings.
pub fn resolve(medium_mounts: &[PathBuf], whole_disk: bool) -> Result<RootDeviceRef, ResolveError> {
    let text = std::fs::read_to_string(PROC_MOUNTS).map_err(|source| ResolveError::MountTable {
        path: PathBuf::from(PROC_MOUNTS),
        source,
    })?;
    let mounts = parse_proc_mounts(&text);
    resolve_from(&mounts, medium_mounts, whole_disk.then_some(Path::new(SYS_CLASS_BLOCK)))
}

/// Parses `/proc/mounts` text (`device mount-point fstype options dump pass`).
/// Malformed lines are skipped.
pub fn parse_proc_mounts(text: &str) -> Vec<MountEntry> {
    text.lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let device = fields.next()?;
            let mount_point = fields.next()?;
            Some(MountEntry {
                mount_point: PathBuf::from(unescape_mount_field(mount_point)),
                device: unescape_mount_field(device),
            })
        })
        .collect()
}

/// Undoes the kernel's octal escaping of whitespace and backslashes
/// (`\040` for a space, `\134` for `\`).
fn unescape_mount_field(field: &str) -> String {
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' {
            if let Some(byte) = bytes.get(i + 1..i + 4).and_then(octal_byte) {
                out.push(byte);
                i += 4;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn octal_byte(digits: &[u8]) -> Option<u8> {
    digits.iter().try_fold(0u8, |acc, &d| {
        if !(b'0'..=b'7').contains(&d) {
            return None;
        }
        acc.checked_mul(8)?.checked_add(d - b'0')
    })
}

/// Pure resolution step: picks the first candidate mount point that appears
/// in `mounts`, strips the device path down to its kernel name and, when
/// `sys_class_block` is given, maps a partition to its parent disk.
pub fn resolve_from(
    mounts: &[MountEntry],
    medium_mounts: &[PathBuf],
    sys_class_block: Option<&Path>,
) -> Result<RootDeviceRef, ResolveError> {
    let device = medium_mounts
        .iter()
        .find_map(|candidate| {
            mounts
                .iter()
                .find(|m| m.mount_point == *candidate && m.device.starts_with("/dev/"))
        })
        .map(|m| m.device.as_str())
        .ok_or_else(|| ResolveError::NoMountedMedium(medium_mounts.to_vec()))?;

    let name = Path::new(device)
        .file_name()
        .and_then(|n| n.to_str())
        .filter(|n| !n.is_empty())
        .ok_or_else(|| ResolveError::InvalidDeviceName(device.to_string()))?;

    let id = match sys_class_block {
        Some(sys) => parent_disk(sys, name).unwrap_or_else(|| name.to_string()),
        None => name.to_string(),
    };
    Ok(RootDeviceRef::new(id))
}

/// Returns the whole-disk name for partition `name`, or `None` if `name` is
/// not a partition (or sysfs has no entry for it).
///
/// `/sys/class/block/<part>` links into `.../block/<disk>/<part>`, and only
/// partitions carry a `partition` attribute.
fn parent_disk(sys_class_block: &Path, name: &str) -> Option<String> {
    let entry = sys_class_block.join(name);
    if !entry.join("partition").exists() {
        return None;
    }
    let resolved = std::fs::canonicalize(&entry).ok()?;
    resolved
        .parent()?
        .file_name()?
        .to_str()
        .map(str::to_string)
}
