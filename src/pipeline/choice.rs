//! Action tokens carried by the format-choice buttons.

use crate::storage::DownloadId;

const AUDIO_PREFIX: &str = "download_mp3_";
const ZIP_PREFIX: &str = "download_zip_";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryFormat {
    /// The stored media file as-is.
    Audio,
    /// The media file wrapped in a single-entry ZIP archive.
    Zip,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormatChoice {
    pub format: DeliveryFormat,
    pub id: DownloadId,
}

impl FormatChoice {
    pub fn new(format: DeliveryFormat, id: DownloadId) -> Self {
        Self { format, id }
    }

    pub fn token(&self) -> String {
        let prefix = match self.format {
            DeliveryFormat::Audio => AUDIO_PREFIX,
            DeliveryFormat::Zip => ZIP_PREFIX,
        };
        format!("{prefix}{}", self.id)
    }

    /// Returns `None` for anything that is not one of our tokens, including
    /// tokens whose identifier is not a valid download id.
    pub fn parse(token: &str) -> Option<Self> {
        let (format, rest) = if let Some(rest) = token.strip_prefix(AUDIO_PREFIX) {
            (DeliveryFormat::Audio, rest)
        } else if let Some(rest) = token.strip_prefix(ZIP_PREFIX) {
            (DeliveryFormat::Zip, rest)
        } else {
            return None;
        };
        rest.parse().ok().map(|id| Self::new(format, id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_carry_format_and_id() {
        let id = DownloadId::new();
        let audio = FormatChoice::new(DeliveryFormat::Audio, id);
        let zip = FormatChoice::new(DeliveryFormat::Zip, id);

        assert_eq!(audio.token(), format!("download_mp3_{id}"));
        assert_eq!(FormatChoice::parse(&audio.token()), Some(audio));
        assert_eq!(FormatChoice::parse(&zip.token()), Some(zip));
    }

    #[test]
    fn tokens_fit_telegram_callback_limit() {
        let token = FormatChoice::new(DeliveryFormat::Zip, DownloadId::new()).token();
        assert!(token.len() <= 64);
    }

    #[test]
    fn foreign_tokens_are_ignored() {
        assert_eq!(FormatChoice::parse("download_flac_123"), None);
        assert_eq!(FormatChoice::parse("download_mp3_../../etc"), None);
        assert_eq!(FormatChoice::parse(""), None);
    }
}
