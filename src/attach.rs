//! Image attachments: a file on disk becomes a base64 string sent in the
//! `images` field of a chat request.

use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use std::path::Path;

#[derive(Debug, Clone)]
pub struct Attachment {
    /// File name shown in the pending-attachments strip.
    pub name: String,
    /// Base64-encoded file contents.
    pub data: String,
}

pub fn load_image(path: &str) -> Result<Attachment> {
    let path = Path::new(path.trim());
    let bytes =
        std::fs::read(path).with_context(|| format!("não foi possível ler {}", path.display()))?;

    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());

    Ok(Attachment {
        name,
        data: STANDARD.encode(&bytes),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn encodes_file_contents_as_base64() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pixel.png");
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(&[0x89, 0x50, 0x4e, 0x47]).unwrap();

        let attachment = load_image(path.to_str().unwrap()).unwrap();
        assert_eq!(attachment.name, "pixel.png");
        assert_eq!(attachment.data, STANDARD.encode([0x89, 0x50, 0x4e, 0x47]));
    }

    #[test]
    fn missing_file_is_an_error() {
        assert!(load_image("/nonexistent/image.png").is_err());
    }
}
