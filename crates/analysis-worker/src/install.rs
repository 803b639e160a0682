//! Locate the Stockfish binary, downloading a release archive when needed.

use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{info, warn};

use crate::config::EngineConfig;
use crate::error::EngineError;

const RELEASE_BASE: &str = "https://github.com/official-stockfish/Stockfish/releases/latest/download";

const USER_AGENT: &str = "Mozilla/5.0 (compatible; chess-lab/1.0)";

const ARCHIVE_SUFFIXES: [&str; 6] = [".zip", ".tar", ".gz", ".bz2", ".xz", ".7z"];

/// Subdirectory of the engine directory that archives are unpacked into.
const EXTRACT_DIR: &str = "download";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ArchiveKind {
    Zip,
    Tar,
}

/// Release asset for an OS / architecture pair as reported by
/// `std::env::consts`.
pub fn default_url(os: &str, arch: &str) -> Option<String> {
    let asset = match (os, arch) {
        ("linux", "x86_64") => "stockfish-ubuntu-x86-64-avx2.tar",
        ("linux", "aarch64") => "stockfish-android-armv8.tar",
        ("macos", "x86_64") => "stockfish-macos-x86-64-avx2.tar",
        ("macos", "aarch64") => "stockfish-macos-m1-apple-silicon.tar",
        ("windows", "x86_64") => "stockfish-windows-x86-64-avx2.zip",
        _ => return None,
    };
    Some(format!("{RELEASE_BASE}/{asset}"))
}

fn is_engine_name(name: &str) -> bool {
    let name = name.to_ascii_lowercase();
    if ARCHIVE_SUFFIXES.iter().any(|suffix| name.ends_with(suffix)) {
        return false;
    }
    name == "stockfish" || (name.starts_with("stockfish") && !name.ends_with(".txt"))
}

/// First file below `dir` that looks like an engine binary.
pub fn find_binary(dir: &Path) -> Option<PathBuf> {
    let pattern = format!("{}/**/*", glob::Pattern::escape(&dir.to_string_lossy()));
    let paths = match glob::glob(&pattern) {
        Ok(paths) => paths,
        Err(e) => {
            warn!(error = %e, dir = %dir.display(), "Invalid engine search pattern");
            return None;
        }
    };

    paths.filter_map(Result::ok).find(|path| {
        path.is_file()
            && path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(is_engine_name)
    })
}

fn archive_kind(bytes: &[u8]) -> Option<ArchiveKind> {
    if bytes.starts_with(b"PK\x03\x04") {
        return Some(ArchiveKind::Zip);
    }
    if bytes.len() > 262 && &bytes[257..262] == b"ustar" {
        return Some(ArchiveKind::Tar);
    }
    None
}

/// Unpack a downloaded archive into `target_dir` and move the engine binary
/// to the top of it.
pub fn install_archive(bytes: &[u8], target_dir: &Path) -> Result<PathBuf, EngineError> {
    let Some(kind) = archive_kind(bytes) else {
        let mut message = String::from(
            "Downloaded file is not a valid archive. \
             This usually means the host returned HTML instead of the binary.",
        );
        let snippet = String::from_utf8_lossy(bytes);
        if let Some(first) = snippet.trim().lines().next() {
            let first: String = first.chars().take(120).collect();
            message.push_str(&format!(" First line: {first}"));
        }
        return Err(EngineError::Install(message));
    };

    let extract_dir = target_dir.join(EXTRACT_DIR);
    fs::create_dir_all(&extract_dir)?;

    match kind {
        ArchiveKind::Zip => {
            let mut archive = zip::ZipArchive::new(Cursor::new(bytes))
                .map_err(|e| EngineError::Install(format!("Failed to read zip archive: {e}")))?;
            archive
                .extract(&extract_dir)
                .map_err(|e| EngineError::Install(format!("Failed to extract zip archive: {e}")))?;
        }
        ArchiveKind::Tar => {
            tar::Archive::new(Cursor::new(bytes))
                .unpack(&extract_dir)
                .map_err(|e| EngineError::Install(format!("Failed to extract tar archive: {e}")))?;
        }
    }

    let binary = find_binary(&extract_dir).ok_or_else(|| {
        EngineError::Install("Downloaded Stockfish archive did not contain a binary.".into())
    })?;
    let file_name = binary
        .file_name()
        .ok_or_else(|| EngineError::Install("Engine binary has no file name".into()))?;
    let final_path = target_dir.join(file_name);
    fs::rename(&binary, &final_path)?;
    make_executable(&final_path)?;

    Ok(final_path)
}

#[cfg(unix)]
fn make_executable(path: &Path) -> Result<(), EngineError> {
    use std::os::unix::fs::PermissionsExt;

    let mut perms = fs::metadata(path)?.permissions();
    perms.set_mode(perms.mode() | 0o111);
    fs::set_permissions(path, perms)?;
    Ok(())
}

#[cfg(not(unix))]
fn make_executable(_path: &Path) -> Result<(), EngineError> {
    Ok(())
}

async fn download(url: &str) -> Result<Vec<u8>, EngineError> {
    let client = reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .timeout(Duration::from_secs(300))
        .build()?;

    let resp = client.get(url).send().await?.error_for_status()?;
    Ok(resp.bytes().await?.to_vec())
}

/// Resolve the engine binary: explicit path, then an existing binary in the
/// engine directory, then a download.
pub async fn ensure_stockfish_binary(config: &EngineConfig) -> Result<PathBuf, EngineError> {
    if let Some(path) = &config.stockfish_path {
        if path.exists() {
            return Ok(path.clone());
        }
        warn!(path = %path.display(), "STOCKFISH_PATH does not exist, searching engine directory");
    }

    let target_dir = config.stockfish_dir.clone();
    fs::create_dir_all(&target_dir)?;

    if let Some(existing) = find_binary(&target_dir) {
        return Ok(existing);
    }

    let url = config
        .stockfish_url
        .clone()
        .or_else(|| default_url(std::env::consts::OS, std::env::consts::ARCH))
        .ok_or_else(|| {
            EngineError::Install(
                "No Stockfish binary available for this platform. \
                 Set STOCKFISH_PATH or STOCKFISH_URL."
                    .into(),
            )
        })?;

    info!(url = %url, dir = %target_dir.display(), "Downloading Stockfish");
    let bytes = download(&url)
        .await
        .map_err(|e| EngineError::Install(format!("Failed to download Stockfish: {e}")))?;

    let path = tokio::task::spawn_blocking(move || install_archive(&bytes, &target_dir))
        .await
        .map_err(|e| EngineError::Install(format!("Install task failed: {e}")))??;

    info!(path = %path.display(), "Stockfish installed");
    Ok(path)
}
