use anyhow::{anyhow, ensure, Result};
use crc::{Crc, CRC_32_BZIP2};
use std::path::Path;

use super::{Session, SessionV1};

fn crc() -> Crc<u32> {
    Crc::<u32>::new(&CRC_32_BZIP2)
}

/// Returns Ok(None) if no session file exists yet
pub async fn load(path: &Path) -> Result<Option<SessionV1>> {
    log::info!("Loading session...");
    if !tokio::fs::try_exists(path).await? {
        return Ok(None);
    }

    let content = tokio::fs::read(path).await?;
    let crc = crc();
    let (parsed, remaining): (Session, &[u8]) =
        postcard::take_from_bytes_crc32(&content, crc.digest())?;
    let Session::V1(session) = parsed;
    ensure!(remaining.is_empty(), "Session file had extra bytes");

    log::info!("Loading session...done");

    Ok(Some(session))
}

pub async fn save(session: SessionV1, path: &Path) -> Result<()> {
    log::info!("Saving session...");

    let crc = crc();
    let content = postcard::to_stdvec_crc32(&Session::V1(session), crc.digest())?;

    // First write to a temporary file so a failure halfway never clobbers the
    // current session
    let filename = path
        .file_name()
        .ok_or_else(|| anyhow!("Path has no filename"))?
        .to_str()
        .ok_or_else(|| anyhow!("Filename isn't valid utf-8"))?;
    let tmppath = path.with_file_name(format!("{}.temp", filename));
    tokio::fs::write(&tmppath, content).await?;
    tokio::fs::rename(&tmppath, path).await?;

    log::info!("Saving session...done");

    Ok(())
}
