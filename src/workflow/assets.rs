use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::Context;
use base64::Engine;
use regex::Regex;

use crate::error::{GenerationError, PipelineError, PipelineResult};
use crate::grid::ARTIFACT_EXTENSION;

pub const SPRITE_META_FILE: &str = "sprite.json";

#[derive(Debug, Clone)]
pub struct SourcePhoto {
    path: PathBuf,
    data_uri: String,
}

impl SourcePhoto {
    pub fn load(path: &Path) -> PipelineResult<Self> {
        let mime = photo_mime_type(path)?;
        let bytes = fs::read(path)
            .with_context(|| format!("failed to read source photo {}", path.display()))?;
        if bytes.is_empty() {
            return Err(PipelineError::validation(format!(
                "source photo {} is empty",
                path.display()
            )));
        }
        Ok(Self::from_bytes(path, mime, &bytes))
    }

    pub fn from_bytes(path: &Path, mime: &str, bytes: &[u8]) -> Self {
        let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);
        Self {
            path: path.to_path_buf(),
            data_uri: format!("data:{mime};base64,{encoded}"),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn data_uri(&self) -> &str {
        &self.data_uri
    }
}

fn photo_mime_type(path: &Path) -> PipelineResult<&'static str> {
    let extension = path
        .extension()
        .and_then(|value| value.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    match extension.as_str() {
        "jpg" | "jpeg" => Ok("image/jpeg"),
        "png" => Ok("image/png"),
        "webp" => Ok("image/webp"),
        "heic" | "heif" => Err(PipelineError::validation(format!(
            "source photo {} is HEIC; convert it to JPEG or PNG first",
            path.display()
        ))),
        _ => Err(PipelineError::validation(format!(
            "source photo {} must be a .jpg, .jpeg, .png or .webp file",
            path.display()
        ))),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLayout {
    dir: PathBuf,
    prefix: String,
    sprite_file: String,
}

impl OutputLayout {
    pub fn new(dir: impl Into<PathBuf>, prefix: impl Into<String>, sprite_file: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            prefix: prefix.into(),
            sprite_file: sprite_file.into(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn artifact_path(&self, filename: &str) -> PathBuf {
        self.dir.join(filename)
    }

    pub fn artifact_exists(&self, filename: &str) -> bool {
        self.artifact_path(filename).is_file()
    }

    pub fn sprite_path(&self) -> PathBuf {
        self.dir.join(&self.sprite_file)
    }

    pub fn meta_path(&self) -> PathBuf {
        self.sprite_path().with_file_name(SPRITE_META_FILE)
    }

    /// Equivalent of the shell glob `<prefix>_*.webp` over the output directory.
    pub fn artifact_pattern(&self) -> Regex {
        let pattern = format!(
            r"^{}_.*\.{}$",
            regex::escape(&self.prefix),
            regex::escape(ARTIFACT_EXTENSION)
        );
        Regex::new(&pattern).expect("escaped artifact pattern is a valid regex")
    }

    /// Artifacts currently on disk, sorted lexicographically (= row-major).
    pub fn list_artifacts(&self) -> anyhow::Result<Vec<PathBuf>> {
        let pattern = self.artifact_pattern();
        let sprite_name = self.sprite_file.as_str();
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(error) if error.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(error) => {
                return Err(error).with_context(|| {
                    format!("failed to list output directory {}", self.dir.display())
                })
            }
        };

        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.with_context(|| {
                format!("failed to read entry in {}", self.dir.display())
            })?;
            if !entry.path().is_file() {
                continue;
            }
            let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
                continue;
            };
            if name != sprite_name && pattern.is_match(&name) {
                names.push(name);
            }
        }
        names.sort();
        Ok(names.into_iter().map(|name| self.dir.join(name)).collect())
    }
}

/// Writes generated bytes to the artifact path, creating the output directory first.
pub async fn write_artifact(
    layout: &OutputLayout,
    filename: &str,
    bytes: &[u8],
) -> Result<PathBuf, GenerationError> {
    let path = layout.artifact_path(filename);
    tokio::fs::create_dir_all(layout.dir())
        .await
        .map_err(|source| GenerationError::Write {
            path: layout.dir().to_path_buf(),
            source,
        })?;
    tokio::fs::write(&path, bytes)
        .await
        .map_err(|source| GenerationError::Write {
            path: path.clone(),
            source,
        })?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    #[test]
    fn photo_becomes_data_uri() {
        let photo = SourcePhoto::from_bytes(Path::new("input/photo.jpeg"), "image/jpeg", b"abc");
        assert_eq!(photo.data_uri(), "data:image/jpeg;base64,YWJj");
        assert_eq!(photo.path(), Path::new("input/photo.jpeg"));
    }

    #[test]
    fn heic_and_unknown_photos_are_rejected() {
        let dir = tempdir().expect("tempdir should create");
        let heic = dir.path().join("photo.HEIC");
        fs::write(&heic, b"x").expect("write");
        let error = SourcePhoto::load(&heic).expect_err("heic rejected");
        assert!(error.to_string().contains("HEIC"));

        let gif = dir.path().join("photo.gif");
        fs::write(&gif, b"x").expect("write");
        assert!(matches!(
            SourcePhoto::load(&gif),
            Err(PipelineError::Validation(_))
        ));
    }

    #[test]
    fn missing_photo_is_an_error() {
        let dir = tempdir().expect("tempdir should create");
        let error = SourcePhoto::load(&dir.path().join("missing.png")).expect_err("missing");
        assert!(matches!(error, PipelineError::Other(_)));
    }

    #[test]
    fn layout_paths() {
        let layout = OutputLayout::new("output", "avatar", "AvatarSprite.webp");
        assert_eq!(
            layout.artifact_path("avatar_003.webp"),
            PathBuf::from("output/avatar_003.webp")
        );
        assert_eq!(layout.sprite_path(), PathBuf::from("output/AvatarSprite.webp"));
        assert_eq!(layout.meta_path(), PathBuf::from("output/sprite.json"));
    }

    #[test]
    fn listing_matches_glob_in_lexicographic_order() {
        let dir = tempdir().expect("tempdir should create");
        let layout = OutputLayout::new(dir.path(), "avatar", "AvatarSprite.webp");
        assert!(layout.list_artifacts().expect("missing dir is empty").is_empty());

        for name in [
            "avatar_002.webp",
            "avatar_000.webp",
            "avatar_001.webp",
            "avatar_001.png",
            "other_000.webp",
            "AvatarSprite.webp",
        ] {
            fs::write(dir.path().join(name), b"x").expect("write");
        }
        let names = layout
            .list_artifacts()
            .expect("listing")
            .into_iter()
            .map(|path| path.file_name().unwrap().to_string_lossy().into_owned())
            .collect::<Vec<_>>();
        assert_eq!(
            names,
            vec!["avatar_000.webp", "avatar_001.webp", "avatar_002.webp"]
        );
    }

    #[tokio::test]
    async fn write_artifact_creates_directory() {
        let dir = tempdir().expect("tempdir should create");
        let layout = OutputLayout::new(dir.path().join("nested/output"), "avatar", "Sprite.webp");
        let path = write_artifact(&layout, "avatar_000.webp", b"image")
            .await
            .expect("write succeeds");
        assert_eq!(fs::read(path).expect("read back"), b"image");
        assert!(layout.artifact_exists("avatar_000.webp"));
        assert!(!layout.artifact_exists("avatar_001.webp"));
    }
}
