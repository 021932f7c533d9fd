//! Reading the OCR service's result archive.
//!
//! The archive is a zip holding one `.tex` source plus the figures it
//! references under `{job_id}/images/{filename}.jpg`. Its bytes are hashed
//! when they arrive so later parsing can detect a copy that was damaged
//! while stored.

use crate::error::Pdf2TxtError;
use sha2::{Digest, Sha256};
use std::io::{Cursor, Read};
use tracing::{debug, warn};
use zip::ZipArchive;

/// Lowercase hex SHA-256 of `bytes`.
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Archive bytes as downloaded, with the hash taken at download time.
#[derive(Debug, Clone)]
pub struct DownloadedArchive {
    pub bytes: Vec<u8>,
    pub sha256: String,
}

impl DownloadedArchive {
    pub fn new(bytes: Vec<u8>) -> Self {
        let sha256 = sha256_hex(&bytes);
        Self { bytes, sha256 }
    }

    /// Re-hash the bytes and compare with the recorded hash.
    pub fn verify(&self, job_id: &str) -> Result<(), Pdf2TxtError> {
        let actual = sha256_hex(&self.bytes);
        if actual != self.sha256 {
            return Err(Pdf2TxtError::ArchiveIntegrity {
                job_id: job_id.to_string(),
                expected: self.sha256.clone(),
                actual,
            });
        }
        Ok(())
    }
}

/// An opened result archive.
pub struct ResultArchive {
    job_id: String,
    zip: ZipArchive<Cursor<Vec<u8>>>,
}

impl std::fmt::Debug for ResultArchive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultArchive")
            .field("job_id", &self.job_id)
            .field("entries", &self.zip.len())
            .finish()
    }
}

impl ResultArchive {
    /// Open archive bytes.
    ///
    /// Bytes that are not a readable zip produce
    /// [`Pdf2TxtError::ArchiveCorrupt`] with `attempts: 1`; the orchestrator
    /// retries the download and reports the final attempt count.
    pub fn open(job_id: &str, bytes: Vec<u8>) -> Result<Self, Pdf2TxtError> {
        let zip = ZipArchive::new(Cursor::new(bytes)).map_err(|e| Pdf2TxtError::ArchiveCorrupt {
            job_id: job_id.to_string(),
            attempts: 1,
            detail: e.to_string(),
        })?;
        debug!("Opened archive for {} ({} entries)", job_id, zip.len());
        Ok(Self {
            job_id: job_id.to_string(),
            zip,
        })
    }

    pub fn entry_names(&self) -> Vec<String> {
        self.zip.file_names().map(str::to_string).collect()
    }

    /// Text of the first entry whose name ends in `.tex`.
    ///
    /// Invalid UTF-8 sequences become U+FFFD and are reported with a warning.
    pub fn tex_source(&mut self) -> Result<String, Pdf2TxtError> {
        let job_id = self.job_id.clone();
        for i in 0..self.zip.len() {
            let mut file = self
                .zip
                .by_index(i)
                .map_err(|e| malformed(&job_id, e.to_string()))?;
            if !file.is_file() || !file.name().ends_with(".tex") {
                continue;
            }
            let name = file.name().to_string();
            let mut bytes = Vec::with_capacity(file.size() as usize);
            file.read_to_end(&mut bytes)
                .map_err(|e| malformed(&job_id, format!("reading {name}: {e}")))?;
            debug!("Using LaTeX source {} ({} bytes)", name, bytes.len());
            return Ok(match String::from_utf8(bytes) {
                Ok(text) => text,
                Err(e) => {
                    warn!(
                        "Job {}: {} is not valid UTF-8 (first bad byte at {}); replacing invalid sequences",
                        job_id,
                        name,
                        e.utf8_error().valid_up_to()
                    );
                    String::from_utf8_lossy(e.as_bytes()).into_owned()
                }
            });
        }
        Err(malformed(
            &job_id,
            format!("no .tex entry among {:?}", self.entry_names()),
        ))
    }

    /// Bytes of the image referenced as `\includegraphics{filename}`.
    ///
    /// Looks up `{job_id}/images/{filename}.jpg` first, then any entry under
    /// an `images/` directory whose file name is `filename.jpg` or
    /// `filename` itself.
    pub fn image(&mut self, filename: &str) -> Result<Vec<u8>, Pdf2TxtError> {
        let job_id = self.job_id.clone();
        let primary = format!("{job_id}/images/{filename}.jpg");
        let name = if self.zip.index_for_name(&primary).is_some() {
            primary
        } else {
            let with_ext = format!("images/{filename}.jpg");
            let bare = format!("images/{filename}");
            self.zip
                .file_names()
                .find(|n| n.ends_with(&with_ext) || n.ends_with(&bare))
                .map(str::to_string)
                .ok_or_else(|| malformed(&job_id, format!("image '{primary}' not found")))?
        };

        let mut file = self
            .zip
            .by_name(&name)
            .map_err(|e| malformed(&job_id, format!("{name}: {e}")))?;
        let mut bytes = Vec::with_capacity(file.size() as usize);
        file.read_to_end(&mut bytes)
            .map_err(|e| malformed(&job_id, format!("reading {name}: {e}")))?;
        Ok(bytes)
    }
}

fn malformed(job_id: &str, detail: String) -> Pdf2TxtError {
    Pdf2TxtError::MalformedArchive {
        job_id: job_id.to_string(),
        detail,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use zip::write::SimpleFileOptions;

    fn build_zip(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        for (name, data) in entries {
            writer.start_file(*name, SimpleFileOptions::default()).unwrap();
            writer.write_all(data).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    #[test]
    fn finds_first_tex_entry() {
        let bytes = build_zip(&[
            ("job1/images/a.jpg", b"\xff\xd8\xff"),
            ("job1/job1.tex", b"\\section{Intro}"),
            ("job1/other.tex", b"ignored"),
        ]);
        let mut archive = ResultArchive::open("job1", bytes).unwrap();
        assert_eq!(archive.tex_source().unwrap(), "\\section{Intro}");
    }

    #[test]
    fn invalid_utf8_is_replaced() {
        let bytes = build_zip(&[("job1/job1.tex", b"Caf\xe9 \\emph{ok}")]);
        let mut archive = ResultArchive::open("job1", bytes).unwrap();
        let text = archive.tex_source().unwrap();
        assert_eq!(text, "Caf\u{FFFD} \\emph{ok}");
    }

    #[test]
    fn missing_tex_is_malformed() {
        let bytes = build_zip(&[("job1/readme.txt", b"x")]);
        let mut archive = ResultArchive::open("job1", bytes).unwrap();
        let err = archive.tex_source().unwrap_err();
        assert!(matches!(err, Pdf2TxtError::MalformedArchive { .. }));
        assert!(err.to_string().contains("readme.txt"));
    }

    #[test]
    fn image_by_canonical_path() {
        let bytes = build_zip(&[
            ("job1/job1.tex", b""),
            ("job1/images/fig-1.jpg", b"JPEGDATA"),
        ]);
        let mut archive = ResultArchive::open("job1", bytes).unwrap();
        assert_eq!(archive.image("fig-1").unwrap(), b"JPEGDATA");
    }

    #[test]
    fn image_falls_back_to_any_images_dir() {
        let bytes = build_zip(&[("renamed/images/fig-2.jpg", b"OTHER")]);
        let mut archive = ResultArchive::open("job1", bytes).unwrap();
        assert_eq!(archive.image("fig-2").unwrap(), b"OTHER");
    }

    #[test]
    fn missing_image_is_malformed() {
        let bytes = build_zip(&[("job1/job1.tex", b"")]);
        let mut archive = ResultArchive::open("job1", bytes).unwrap();
        let err = archive.image("nope").unwrap_err();
        assert!(err.to_string().contains("job1/images/nope.jpg"));
    }

    #[test]
    fn garbage_bytes_are_corrupt() {
        let err = ResultArchive::open("job1", b"PK\x03\x04truncated".to_vec()).unwrap_err();
        assert!(matches!(err, Pdf2TxtError::ArchiveCorrupt { attempts: 1, .. }));
    }

    #[test]
    fn integrity_check_detects_mutation() {
        let mut downloaded = DownloadedArchive::new(b"archive-bytes".to_vec());
        downloaded.verify("job1").unwrap();
        downloaded.bytes[0] ^= 0xff;
        let err = downloaded.verify("job1").unwrap_err();
        assert!(err.to_string().contains("got broken during storage"));
    }

    #[test]
    fn sha256_of_empty_input() {
        assert_eq!(
            sha256_hex(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }
}
