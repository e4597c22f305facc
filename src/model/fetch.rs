use anyhow::{Context, Result, bail};
use flate2::read::GzDecoder;
use indicatif::{ProgressBar, ProgressStyle};
use log::info;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tar::Archive;

use crate::error::{RunnerError, RunnerResult};

/// Download `url` into `root/archive_name` and unpack it into `root`.
///
/// Nothing is retried: a failed transfer, checksum or extraction surfaces as
/// [`RunnerError::Acquisition`].
pub fn fetch_archive(
    url: &str,
    root: &Path,
    archive_name: &str,
    expected_sha256: Option<&str>,
) -> RunnerResult<PathBuf> {
    let acquire = || -> Result<PathBuf> {
        std::fs::create_dir_all(root)?;
        let archive = root.join(archive_name);
        download_file(url, &archive, expected_sha256)?;
        extract_archive(&archive, root)?;
        Ok(archive)
    };

    acquire().map_err(|source| RunnerError::Acquisition {
        url: url.to_string(),
        source,
    })
}

fn download_file(url: &str, dest: &Path, expected_sha256: Option<&str>) -> Result<()> {
    info!("downloading {}", url);

    // No global timeout: a slow mirror blocks instead of failing.
    let agent = ureq::Agent::config_builder()
        .timeout_connect(Some(Duration::from_secs(30)))
        .build()
        .new_agent();

    let response = agent.get(url).call()?;
    let total: Option<u64> = response
        .headers()
        .get("content-length")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok());

    let progress = match total {
        Some(total) => ProgressBar::new(total),
        None => ProgressBar::new_spinner(),
    };
    progress.set_style(
        ProgressStyle::with_template("{msg} [{bar:30}] {bytes}/{total_bytes}")?
            .progress_chars("=> "),
    );
    progress.set_message(
        dest.file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default(),
    );

    let mut reader = response.into_body().into_reader();
    let tmp = dest.with_extension("part");
    let mut hasher = Sha256::new();

    let streamed = (|| -> Result<()> {
        let mut file = File::create(&tmp)?;
        let mut buf = [0u8; 64 * 1024];
        loop {
            let n = reader.read(&mut buf)?;
            if n == 0 {
                return Ok(());
            }
            file.write_all(&buf[..n])?;
            hasher.update(&buf[..n]);
            progress.inc(n as u64);
        }
    })();
    progress.finish_and_clear();
    if let Err(e) = streamed {
        let _ = std::fs::remove_file(&tmp);
        return Err(e.context(format!("download of {url} interrupted")));
    }

    if let Some(expected) = expected_sha256 {
        let actual = format!("{:x}", hasher.finalize());
        if !actual.eq_ignore_ascii_case(expected.trim()) {
            let _ = std::fs::remove_file(&tmp);
            bail!("SHA256 mismatch: expected {}, got {}", expected, actual);
        }
    }

    std::fs::rename(&tmp, dest)?;
    info!("downloaded {}", dest.display());
    Ok(())
}

/// Unpack a `.tar.gz` into `dest`.
///
/// Entries land in a staging directory inside `dest` first and are moved into
/// place only once the whole archive has unpacked, so a truncated or corrupt
/// archive leaves `dest` untouched.
pub fn extract_archive(archive: &Path, dest: &Path) -> Result<()> {
    let file = File::open(archive)
        .with_context(|| format!("cannot open archive {}", archive.display()))?;
    let staging = tempfile::Builder::new()
        .prefix(".extract-")
        .tempdir_in(dest)
        .with_context(|| format!("cannot create staging dir in {}", dest.display()))?;

    let mut tar = Archive::new(GzDecoder::new(file));
    tar.unpack(staging.path())
        .with_context(|| format!("cannot extract {}", archive.display()))?;
    move_into(staging.path(), dest)?;

    info!("extracted {} into {}", archive.display(), dest.display());
    Ok(())
}

/// Move every entry of `src` into `dst`, merging directories that already exist.
fn move_into(src: &Path, dst: &Path) -> Result<()> {
    for entry in std::fs::read_dir(src)? {
        let entry = entry?;
        let from = entry.path();
        let to = dst.join(entry.file_name());

        if entry.file_type()?.is_dir() && to.is_dir() {
            move_into(&from, &to)?;
            continue;
        }
        if to.is_dir() {
            std::fs::remove_dir_all(&to)?;
        } else if to.exists() {
            std::fs::remove_file(&to)?;
        }
        std::fs::rename(&from, &to)
            .with_context(|| format!("cannot move {} into place", to.display()))?;
    }
    Ok(())
}
