//! User-facing chat texts.

use teloxide::utils::html;

pub const GREETING: &str = "Ciao 🐈, mandami il link ad un video di una canzone";
pub const SEARCHING: &str = "Molto bene, vediamo se trovo qualcosa... 🔍";
pub const SENDING: &str = "Ok, ora te lo sto inviando! 🐶";
pub const FAREWELL: &str = "A presto! 👋";
pub const NOT_FOUND: &str = "🙁 Non trovo più questo download, mandami di nuovo il link";
pub const CHOICE_UNAVAILABLE: &str = "🙁 Questo download non è più disponibile per te";
pub const DELIVERY_FAILED: &str = "🙁 Non sono riuscito a inviarti il file";

/// HTML formatted; the title is escaped.
pub fn found(title: &str) -> String {
    format!("👍 Ok, trovato <b>{}</b>. Provo a scaricare...", html::escape(title))
}

pub fn done(audio_format: &str) -> String {
    format!("Fatto! 😀\nPreferisci che ti mandi il file come {audio_format} o zip?")
}

pub fn download_failed(url: &str) -> String {
    format!("🙁 Non sono riuscito a scaricare il video {url}")
}
