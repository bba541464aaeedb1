use crate::error::{Result, SupervisorError};
use gsv_protocol::status::Platform;
use lazy_static::lazy_static;
use log::debug;
use regex::Regex;
use std::fmt;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

/// `major.minor.patch.build` as embedded in the game binary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct GameVersion {
    parts: [u32; 4],
}

impl GameVersion {
    pub fn new(major: u32, minor: u32, patch: u32, build: u32) -> Self {
        Self {
            parts: [major, minor, patch, build],
        }
    }
}

impl TryFrom<&str> for GameVersion {
    type Error = SupervisorError;

    fn try_from(value: &str) -> Result<Self> {
        lazy_static! {
            static ref VERSION_RE: Regex = Regex::new(r"^(\d+)\.(\d+)\.(\d+)\.(\d+)$").unwrap();
        }
        let caps = VERSION_RE
            .captures(value.trim())
            .ok_or_else(|| SupervisorError::UnexpectedVersion(value.to_owned()))?;

        let mut parts = [0u32; 4];
        for (i, part) in parts.iter_mut().enumerate() {
            *part = caps[i + 1]
                .parse()
                .map_err(|_| SupervisorError::UnexpectedVersion(value.to_owned()))?;
        }
        Ok(Self { parts })
    }
}

impl fmt::Display for GameVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [major, minor, patch, build] = self.parts;
        write!(f, "{}.{}.{}.{}", major, minor, patch, build)
    }
}

/// Where each platform's binary keeps its version string.
fn version_location(platform: Platform) -> Result<(u64, usize)> {
    match platform {
        Platform::Windows => Ok((88544, 18)),
        Platform::Linux => Ok((0x148b8, 36)),
        Platform::Macos | Platform::Other => Err(SupervisorError::unsupported("version lookup")),
    }
}

/// Reads the version string out of the game binary.
pub fn read_binary_version<P: AsRef<Path>>(path: P, platform: Platform) -> Result<GameVersion> {
    let (offset, len) = version_location(platform)?;
    let mut file = std::fs::File::open(path.as_ref())?;
    file.seek(SeekFrom::Start(offset))?;

    let mut buf = Vec::with_capacity(len);
    file.take(len as u64).read_to_end(&mut buf)?;
    // the string is padded, and on some builds interleaved, with NULs
    buf.retain(|byte| *byte != 0);
    let text = String::from_utf8_lossy(&buf);
    debug!("detected version number: {}", text);

    GameVersion::try_from(text.as_ref())
}
