//! Devotee photos: local storage of uploads and generated avatars.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat};
use std::fs::create_dir_all;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

use crate::error::{AttendanceError, Result};
use crate::models::Devotee;

/// Stored photos are shrunk to fit inside this square.
pub const MAX_PHOTO_SIDE: u32 = 400;

/// URL prefix the media directory is served under.
pub const MEDIA_URL: &str = "/media";

const AVATAR_COLOURS: [&str; 8] = [
    "#1abc9c", "#3498db", "#9b59b6", "#e67e22", "#e74c3c", "#2c3e50", "#16a085", "#d35400",
];

/// Photo to show for a devotee: the stored one or an initials avatar.
pub fn photo_src(devotee: &Devotee) -> String {
    match devotee.photo_url.as_deref() {
        Some(url) if !url.is_empty() => url.to_string(),
        _ => initials_avatar(&devotee.name),
    }
}

/// SVG data URI showing up to two initials of `name`.
///
/// The background colour is picked from the name, so a devotee keeps the
/// same colour between pages.
pub fn initials_avatar(name: &str) -> String {
    let initials: String = name
        .split_whitespace()
        .filter_map(|word| word.chars().next())
        .take(2)
        .flat_map(char::to_uppercase)
        .collect();
    let initials = if initials.is_empty() {
        "?".to_string()
    } else {
        initials
    };

    let hash = name
        .bytes()
        .fold(0usize, |acc, b| acc.wrapping_mul(31).wrapping_add(b as usize));
    let colour = AVATAR_COLOURS[hash % AVATAR_COLOURS.len()];

    let svg = format!(
        "<svg xmlns='http://www.w3.org/2000/svg' width='100' height='100'>\
         <rect width='100' height='100' fill='{}'/>\
         <text x='50' y='50' dy='.35em' text-anchor='middle' font-family='Arial' \
         font-size='40' fill='#ffffff'>{}</text></svg>",
        colour,
        escape_xml(&initials)
    );
    format!("data:image/svg+xml;base64,{}", STANDARD.encode(svg))
}

fn escape_xml(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('\'', "&apos;")
}

/// Decode a `data:image/<ext>;base64,<payload>` URL, as sent by the
/// browser-side cropper.
pub fn decode_data_url(data_url: &str) -> Result<Vec<u8>> {
    let rest = data_url
        .trim()
        .strip_prefix("data:image/")
        .ok_or_else(|| AttendanceError::invalid("Cropped photo must be an image data URL."))?;
    let (_, payload) = rest
        .split_once(";base64,")
        .ok_or_else(|| AttendanceError::invalid("Cropped photo must be base64 encoded."))?;
    STANDARD
        .decode(payload.trim())
        .map_err(|_| AttendanceError::invalid("Cropped photo could not be decoded."))
}

/// `first_last_phone.jpg`, or `first_phone.jpg` for a one-word name.
pub fn photo_file_name(name: &str, phone: &str) -> String {
    let words: Vec<String> = name
        .split_whitespace()
        .map(|w| {
            w.chars()
                .filter(|c| c.is_ascii_alphanumeric())
                .collect::<String>()
                .to_lowercase()
        })
        .filter(|w| !w.is_empty())
        .collect();
    let phone: String = phone.chars().filter(|c| c.is_ascii_digit()).collect();

    let mut parts: Vec<&str> = Vec::new();
    if let Some(first) = words.first() {
        parts.push(first);
    }
    if words.len() > 1 {
        if let Some(last) = words.last() {
            parts.push(last);
        }
    }
    if !phone.is_empty() {
        parts.push(&phone);
    }
    if parts.is_empty() {
        parts.push("devotee");
    }
    format!("{}.jpg", parts.join("_"))
}

/// A processed photo sitting in a temp file inside the media dir.
///
/// Nothing under its public name changes until [`commit`](Self::commit);
/// dropping it removes the temp file.
#[derive(Debug)]
pub struct StagedPhoto {
    tmp: NamedTempFile,
    path: PathBuf,
    url: String,
}

impl StagedPhoto {
    /// Public URL the photo will have once committed.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Move the photo to its public name, replacing any earlier file there.
    pub fn commit(self) -> Result<String> {
        self.tmp
            .persist(&self.path)
            .map_err(|e| AttendanceError::Io(e.error))?;
        log::info!("Stored photo {}", self.path.display());
        Ok(self.url)
    }
}

/// Decode an uploaded photo and write it to a temp file under `media_dir`.
///
/// Anything that is not an image is rejected. The image is shrunk to fit
/// [`MAX_PHOTO_SIDE`] and re-encoded as JPEG.
pub fn stage_photo(media_dir: &Path, name: &str, phone: &str, bytes: &[u8]) -> Result<StagedPhoto> {
    let image = image::load_from_memory(bytes)
        .map_err(|_| AttendanceError::invalid("Uploaded photo is not a valid image."))?;

    let image = if image.width() > MAX_PHOTO_SIDE || image.height() > MAX_PHOTO_SIDE {
        image.resize(MAX_PHOTO_SIDE, MAX_PHOTO_SIDE, FilterType::Lanczos3)
    } else {
        image
    };
    let rgb = DynamicImage::ImageRgb8(image.to_rgb8());

    create_dir_all(media_dir)?;
    let mut tmp = NamedTempFile::new_in(media_dir)?;
    rgb.write_to(tmp.as_file_mut(), ImageFormat::Jpeg)
        .map_err(|e| AttendanceError::Storage(format!("could not save photo: {}", e)))?;
    tmp.flush()?;

    let file_name = photo_file_name(name, phone);
    Ok(StagedPhoto {
        tmp,
        path: media_dir.join(&file_name),
        url: format!("{}/{}", MEDIA_URL, file_name),
    })
}

/// Save an uploaded photo under `media_dir` and return its public URL.
pub fn store_photo(media_dir: &Path, name: &str, phone: &str, bytes: &[u8]) -> Result<String> {
    stage_photo(media_dir, name, phone, bytes)?.commit()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn avatar_is_stable_svg_data_uri() {
        let a = initials_avatar("Ram Patel");
        assert!(a.starts_with("data:image/svg+xml;base64,"));
        assert_eq!(a, initials_avatar("Ram Patel"));

        let svg = STANDARD
            .decode(a.trim_start_matches("data:image/svg+xml;base64,"))
            .unwrap();
        assert!(String::from_utf8(svg).unwrap().contains(">RP</text>"));
    }

    #[test]
    fn file_names() {
        assert_eq!(photo_file_name("Ram Kumar Patel", "98765 43210"), "ram_patel_9876543210.jpg");
        assert_eq!(photo_file_name("Sita", "9876543210"), "sita_9876543210.jpg");
        assert_eq!(photo_file_name("", ""), "devotee.jpg");
    }

    fn png() -> Vec<u8> {
        let mut bytes = std::io::Cursor::new(Vec::new());
        DynamicImage::new_rgb8(8, 6)
            .write_to(&mut bytes, ImageFormat::Png)
            .unwrap();
        bytes.into_inner()
    }

    #[test]
    fn staged_photo_appears_only_on_commit() {
        let dir = tempfile::TempDir::new().unwrap();
        let target = dir.path().join("sita_9876543210.jpg");

        let dropped = stage_photo(dir.path(), "Sita", "9876543210", &png()).unwrap();
        assert_eq!(dropped.url(), "/media/sita_9876543210.jpg");
        drop(dropped);
        assert!(!target.exists());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);

        let url = store_photo(dir.path(), "Sita", "9876543210", &png()).unwrap();
        assert_eq!(url, "/media/sita_9876543210.jpg");
        assert!(target.exists());
    }

    #[test]
    fn non_images_are_rejected() {
        let dir = tempfile::TempDir::new().unwrap();
        assert!(matches!(
            stage_photo(dir.path(), "Sita", "1", b"not an image"),
            Err(AttendanceError::Validation(_))
        ));
    }

    #[test]
    fn data_urls() {
        let url = format!("data:image/png;base64,{}", STANDARD.encode(b"abc"));
        assert_eq!(decode_data_url(&url).unwrap(), b"abc");
        assert!(decode_data_url("data:text/plain;base64,YWJj").is_err());
        assert!(decode_data_url("data:image/png,abc").is_err());
    }
}
