//! Adapter around the external extraction tool (yt-dlp or a compatible fork).
//!
//! Resolving sources and transcoding audio is left entirely to the tool. This
//! module only builds command lines, waits for the child, and maps failures
//! onto [`Error::Extraction`].

use std::{
    path::{Path, PathBuf},
    process::Stdio,
    time::Duration,
};

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;
use tracing::{debug, info};

use crate::error::{Error, Result};

/// Metadata resolved for a source URL before anything is downloaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaInfo {
    pub id: String,
    pub title: String,
    pub uploader: Option<String>,
    pub duration: Option<u64>,
}

/// The two things the pipeline needs from an extraction backend.
#[async_trait]
pub trait Extractor: Send + Sync {
    async fn fetch_metadata(&self, url: &str) -> Result<MediaInfo>;

    /// Downloads `url` and transcodes it to audio inside `destination`. The
    /// output file name is derived from the source title.
    async fn extract_audio(&self, url: &str, destination: &Path) -> Result<()>;
}

/// Subset of the `--dump-single-json` payload that we read.
#[derive(Debug, Deserialize)]
struct InfoJson {
    #[serde(default)]
    id: Option<String>,
    title: Option<String>,
    fulltitle: Option<String>,
    uploader: Option<String>,
    duration: Option<f64>,
}

impl InfoJson {
    fn into_media_info(self) -> MediaInfo {
        let id = self.id.unwrap_or_default();
        let title = self
            .fulltitle
            .filter(|t| !t.is_empty())
            .or(self.title.filter(|t| !t.is_empty()))
            .unwrap_or_else(|| id.clone());
        MediaInfo {
            id,
            title,
            uploader: self.uploader,
            duration: self
                .duration
                .filter(|d| d.is_finite() && *d >= 0.0)
                .map(|d| d.round() as u64),
        }
    }
}

#[derive(Debug, Clone)]
pub struct YtDlp {
    program: PathBuf,
    audio_format: String,
    timeout: Duration,
}

impl YtDlp {
    pub fn new(program: impl Into<PathBuf>, audio_format: impl Into<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            audio_format: audio_format.into(),
            timeout,
        }
    }

    pub fn audio_format(&self) -> &str {
        &self.audio_format
    }

    /// Runs `<program> --version` so a missing tool fails at startup rather
    /// than on the first user request.
    pub async fn ensure_available(&self) -> Result<String> {
        let output = Command::new(&self.program)
            .arg("--version")
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|err| {
                Error::extraction(format!(
                    "{} is not installed or not in PATH: {err}",
                    self.program.display()
                ))
            })?;
        if !output.status.success() {
            return Err(Error::extraction(format!(
                "{} is installed but returned {}",
                self.program.display(),
                output.status
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_owned())
    }

    fn output_template(destination: &Path) -> String {
        destination
            .join("%(title)s.%(ext)s")
            .to_string_lossy()
            .into_owned()
    }

    async fn run(&self, mut command: Command, url: &str) -> Result<std::process::Output> {
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = command.spawn().map_err(|err| {
            Error::extraction(format!("unable to run {}: {err}", self.program.display()))
        })?;

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| Error::Timeout {
                seconds: self.timeout.as_secs(),
            })??;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let message = stderr
                .lines()
                .rev()
                .find(|line| !line.trim().is_empty())
                .map(str::trim)
                .unwrap_or("no error output");
            return Err(Error::extraction(format!(
                "{url}: {message} ({})",
                output.status
            )));
        }
        Ok(output)
    }
}

#[async_trait]
impl Extractor for YtDlp {
    async fn fetch_metadata(&self, url: &str) -> Result<MediaInfo> {
        let mut command = Command::new(&self.program);
        command
            .arg("--dump-single-json")
            .arg("--skip-download")
            .arg("--no-playlist")
            .arg("--no-warnings")
            .arg(url);

        let output = self.run(command, url).await?;
        let info: InfoJson = serde_json::from_slice(&output.stdout)
            .map_err(|err| Error::extraction(format!("{url}: unreadable metadata: {err}")))?;
        Ok(info.into_media_info())
    }

    async fn extract_audio(&self, url: &str, destination: &Path) -> Result<()> {
        let mut command = Command::new(&self.program);
        command
            .arg("-x")
            .arg("--audio-format")
            .arg(&self.audio_format)
            .arg("--audio-quality")
            .arg("0")
            .arg("--no-playlist")
            .arg("--no-progress")
            .arg("-o")
            .arg(Self::output_template(destination))
            .arg(url);

        info!(url, dir = %destination.display(), format = %self.audio_format, "extracting audio");
        let output = self.run(command, url).await?;
        for line in String::from_utf8_lossy(&output.stdout).lines() {
            debug!(url, "{line}");
        }
        Ok(())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::tempdir;

    /// Writes a fake extraction tool that understands the flags we pass.
    fn install_stub(dir: &Path, body: &str) -> PathBuf {
        let script_path = dir.join("yt-dlp");
        let script = format!("#!/usr/bin/env bash\nset -euo pipefail\n{body}\n");
        fs::write(&script_path, script).unwrap();
        let mut perms = fs::metadata(&script_path).unwrap().permissions();
        perms.set_mode(0o755);
        fs::set_permissions(&script_path, perms).unwrap();
        script_path
    }

    const WORKING_STUB: &str = r#"
prev=""
output=""
for arg in "$@"; do
    if [[ "$prev" == "-o" ]]; then
        output="$arg"
    fi
    prev="$arg"
done
url="${@: -1}"
if [[ "$url" == *"broken"* ]]; then
    echo "ERROR: Unsupported URL: $url" >&2
    exit 1
fi
if [[ " $* " == *" --version "* ]]; then
    echo "2024.01.01"
    exit 0
fi
if [[ " $* " == *" --dump-single-json "* ]]; then
    echo '{"id":"video123","title":"Short","fulltitle":"Full Title","uploader":"Someone","duration":61.6}'
    exit 0
fi
if [[ " $* " == *" -x "* ]]; then
    target="$(dirname "$output")/Full Title.mp3"
    printf 'ID3fake' > "$target"
    echo "[ExtractAudio] Destination: $target"
    exit 0
fi
exit 2
"#;

    fn tool(dir: &Path) -> YtDlp {
        YtDlp::new(install_stub(dir, WORKING_STUB), "mp3", Duration::from_secs(30))
    }

    #[tokio::test]
    async fn ensure_available_reports_version() {
        let dir = tempdir().unwrap();
        assert_eq!(tool(dir.path()).ensure_available().await.unwrap(), "2024.01.01");
    }

    #[tokio::test]
    async fn ensure_available_fails_for_missing_program() {
        let dir = tempdir().unwrap();
        let missing = YtDlp::new(dir.path().join("nope"), "mp3", Duration::from_secs(5));
        assert!(matches!(
            missing.ensure_available().await.unwrap_err(),
            Error::Extraction { .. }
        ));
    }

    #[tokio::test]
    async fn fetch_metadata_prefers_full_title() {
        let dir = tempdir().unwrap();
        let info = tool(dir.path())
            .fetch_metadata("https://example.com/video123")
            .await
            .unwrap();
        assert_eq!(info.id, "video123");
        assert_eq!(info.title, "Full Title");
        assert_eq!(info.uploader.as_deref(), Some("Someone"));
        assert_eq!(info.duration, Some(62));
    }

    #[tokio::test]
    async fn fetch_metadata_surfaces_tool_error() {
        let dir = tempdir().unwrap();
        let err = tool(dir.path())
            .fetch_metadata("https://example.com/broken")
            .await
            .unwrap_err();
        match err {
            Error::Extraction { message } => assert!(message.contains("Unsupported URL")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn extract_audio_writes_into_destination() {
        let dir = tempdir().unwrap();
        let dest = dir.path().join("out");
        fs::create_dir(&dest).unwrap();

        tool(dir.path())
            .extract_audio("https://example.com/video123", &dest)
            .await
            .unwrap();

        let files: Vec<_> = fs::read_dir(&dest).unwrap().map(|e| e.unwrap().file_name()).collect();
        assert_eq!(files, vec![std::ffi::OsString::from("Full Title.mp3")]);
    }

    #[tokio::test]
    async fn extract_audio_times_out() {
        let dir = tempdir().unwrap();
        let slow = YtDlp::new(install_stub(dir.path(), "sleep 5"), "mp3", Duration::from_millis(100));
        let err = slow
            .extract_audio("https://example.com/slow", dir.path())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Timeout { .. }));
    }

    #[test]
    fn info_json_falls_back_to_id_for_title() {
        let info: InfoJson = serde_json::from_str(r#"{"id":"abc","title":""}"#).unwrap();
        assert_eq!(info.into_media_info().title, "abc");
    }
}
