use crate::FileMetadata;
use crate::config::SendLimits;
use crate::transfer::constants::MAX_FILENAME_LENGTH;
use bytes::Bytes;
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;

use super::TransferError;

const FALLBACK_MIME_TYPE: &str = "application/octet-stream";

/// A file queued for sending
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingFile {
    pub metadata: FileMetadata,
    pub data: Bytes,
}

impl OutgoingFile {
    /// Size in the metadata always matches the data
    pub fn from_bytes(name: impl Into<String>, mime_type: impl Into<String>, data: Bytes) -> Self {
        Self {
            metadata: FileMetadata::new(name, data.len() as u64, mime_type),
            data,
        }
    }

    /// Read a file from disk; the mime type is guessed from the extension
    pub async fn from_path(path: &Path) -> Result<Self, TransferError> {
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| TransferError::Rejected(format!("invalid file name: {}", path.display())))?
            .to_string();
        let data = tokio::fs::read(path).await?;
        let mime_type = guess_mime_type(&file_name);
        Ok(Self::from_bytes(file_name, mime_type, Bytes::from(data)))
    }
}

/// A finalized file on the receiving side
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedFile {
    pub metadata: FileMetadata,
    pub data: Bytes,
}

impl ReceivedFile {
    /// Write into `dir` under a sanitized name; returns the saved path
    pub async fn save_to(&self, dir: &Path) -> Result<PathBuf, TransferError> {
        tokio::fs::create_dir_all(dir).await?;
        let path = dir.join(sanitize_file_name(&self.metadata.name));
        let mut file = open_secure_file(&path).await?;
        file.write_all(&self.data).await?;
        file.flush().await?;
        Ok(path)
    }
}

/// Check files against the sender's limits before anything is announced
pub fn validate_files(files: &[OutgoingFile], limits: &SendLimits) -> Result<(), TransferError> {
    if let Some(max_files) = limits.max_files {
        if files.len() > max_files {
            return Err(TransferError::Rejected(format!(
                "{} files selected, at most {} allowed",
                files.len(),
                max_files
            )));
        }
    }

    for file in files {
        let meta = &file.metadata;
        if meta.size != file.data.len() as u64 {
            return Err(TransferError::Rejected(format!(
                "{}: declared size {} differs from {} bytes of data",
                meta.name,
                meta.size,
                file.data.len()
            )));
        }
        if meta.name.len() > MAX_FILENAME_LENGTH {
            return Err(TransferError::Rejected(format!(
                "Filename too long ({} chars, max {})",
                meta.name.len(),
                MAX_FILENAME_LENGTH
            )));
        }
        if let Some(max_size) = limits.max_file_size {
            if meta.size > max_size {
                return Err(TransferError::Rejected(format!(
                    "{} ({} bytes) exceeds maximum allowed size of {} bytes",
                    meta.name, meta.size, max_size
                )));
            }
        }
        if let Some(prefix) = &limits.allowed_mime_prefix {
            if !meta.mime_type.starts_with(prefix.as_str()) {
                return Err(TransferError::Rejected(format!(
                    "{}: only {}* files are allowed",
                    meta.name, prefix
                )));
            }
        }
    }
    Ok(())
}

/// Guess a mime type from the file extension
pub fn guess_mime_type(file_name: &str) -> &'static str {
    let ext = match file_name.rsplit_once('.') {
        Some((_, ext)) => ext.to_ascii_lowercase(),
        None => return FALLBACK_MIME_TYPE,
    };
    match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        "bmp" => "image/bmp",
        "ico" => "image/x-icon",
        "txt" => "text/plain",
        "html" | "htm" => "text/html",
        "css" => "text/css",
        "csv" => "text/csv",
        "json" => "application/json",
        "pdf" => "application/pdf",
        "zip" => "application/zip",
        "gz" => "application/gzip",
        "mp3" => "audio/mpeg",
        "wav" => "audio/wav",
        "mp4" => "video/mp4",
        "webm" => "video/webm",
        _ => FALLBACK_MIME_TYPE,
    }
}

/// Open a file with secure permissions (0o600 on Unix) for writing
pub async fn open_secure_file(path: &Path) -> std::io::Result<File> {
    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    options.mode(0o600);

    options.open(path).await
}

/// Sanitize file name to prevent path traversal attacks and ensure safety
pub fn sanitize_file_name(file_name: &str) -> String {
    // Last component only, for both separators
    let file_name = file_name
        .split(|c| c == '/' || c == '\\')
        .last()
        .unwrap_or("unknown_file");

    let mut clean_name: String = file_name.chars().filter(|c| !c.is_control()).collect();

    // See: https://learn.microsoft.com/en-us/windows/win32/fileio/naming-a-file
    let reserved_names = [
        "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7",
        "COM8", "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
    ];
    if reserved_names.iter().any(|&r| clean_name.eq_ignore_ascii_case(r)) {
        return "unknown_file".to_string();
    }

    if clean_name == ".." || clean_name == "." || clean_name.trim().is_empty() {
        return "unknown_file".to_string();
    }

    if clean_name.len() > MAX_FILENAME_LENGTH {
        let (base, ext) = match clean_name.rfind('.') {
            // Keep reasonable extensions
            Some(idx) if clean_name.len() - idx < 20 => {
                (clean_name[..idx].to_string(), clean_name[idx..].to_string())
            }
            _ => (clean_name.clone(), String::new()),
        };
        let mut cutoff = MAX_FILENAME_LENGTH - ext.len();
        while !base.is_char_boundary(cutoff) {
            cutoff -= 1;
        }
        clean_name = format!("{}{}", &base[..cutoff], ext);
    }

    clean_name
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_bytes_sets_size() {
        let file = OutgoingFile::from_bytes("a.png", "image/png", Bytes::from(vec![1u8; 42]));
        assert_eq!(file.metadata, FileMetadata::new("a.png", 42, "image/png"));
    }

    #[test]
    fn test_validate_files_limits() {
        let image = OutgoingFile::from_bytes("a.png", "image/png", Bytes::from(vec![0u8; 10]));
        let text = OutgoingFile::from_bytes("b.txt", "text/plain", Bytes::from(vec![0u8; 10]));

        assert!(validate_files(&[image.clone(), text.clone()], &SendLimits::default()).is_ok());

        let limits = SendLimits {
            max_files: Some(1),
            ..Default::default()
        };
        assert!(matches!(
            validate_files(&[image.clone(), text.clone()], &limits),
            Err(TransferError::Rejected(_))
        ));

        let limits = SendLimits {
            allowed_mime_prefix: Some("image/".to_string()),
            ..Default::default()
        };
        assert!(validate_files(&[image.clone()], &limits).is_ok());
        assert!(validate_files(&[text], &limits).is_err());

        let limits = SendLimits {
            max_file_size: Some(5),
            ..Default::default()
        };
        assert!(validate_files(&[image], &limits).is_err());
    }

    #[test]
    fn test_validate_files_size_mismatch() {
        let mut file = OutgoingFile::from_bytes("a.bin", "application/octet-stream", Bytes::from_static(b"abc"));
        file.metadata.size = 4;
        assert!(validate_files(&[file], &SendLimits::default()).is_err());
    }

    #[test]
    fn test_guess_mime_type() {
        assert_eq!(guess_mime_type("photo.PNG"), "image/png");
        assert_eq!(guess_mime_type("archive.tar.gz"), "application/gzip");
        assert_eq!(guess_mime_type("README"), FALLBACK_MIME_TYPE);
        assert_eq!(guess_mime_type("data.unknownext"), FALLBACK_MIME_TYPE);
    }

    #[test]
    fn test_sanitize_file_name_traversal() {
        assert_eq!(sanitize_file_name("normal_file.txt"), "normal_file.txt");
        assert_eq!(sanitize_file_name("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_file_name("..\\..\\Windows\\System32\\cmd.exe"), "cmd.exe");
        assert_eq!(sanitize_file_name("folder\\../file.txt"), "file.txt");
    }

    #[test]
    fn test_sanitize_file_name_dangerous() {
        assert_eq!(sanitize_file_name(".."), "unknown_file");
        assert_eq!(sanitize_file_name(""), "unknown_file");
        assert_eq!(sanitize_file_name("/"), "unknown_file");
        assert_eq!(sanitize_file_name("con"), "unknown_file");
        assert_eq!(sanitize_file_name("concert.txt"), "concert.txt");
    }

    #[test]
    fn test_sanitize_file_name_length() {
        let crab = "🦀".repeat(100) + ".png";
        let sanitized = sanitize_file_name(&crab);
        assert!(sanitized.len() <= MAX_FILENAME_LENGTH);
        assert!(sanitized.ends_with("🦀.png"));

        let long_no_ext = "a".repeat(300);
        assert_eq!(sanitize_file_name(&long_no_ext).len(), MAX_FILENAME_LENGTH);
    }

    #[tokio::test]
    async fn test_save_to_and_from_path() {
        let dir = tempfile::tempdir().unwrap();
        let received = ReceivedFile {
            metadata: FileMetadata::new("../escape.png", 4, "image/png"),
            data: Bytes::from_static(b"\x89PNG"),
        };

        let path = received.save_to(dir.path()).await.unwrap();
        assert_eq!(path, dir.path().join("escape.png"));

        let reloaded = OutgoingFile::from_path(&path).await.unwrap();
        assert_eq!(reloaded.metadata, FileMetadata::new("escape.png", 4, "image/png"));
        assert_eq!(reloaded.data, received.data);

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }
}
