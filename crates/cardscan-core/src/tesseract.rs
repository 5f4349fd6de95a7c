//! Tesseract command-line backend.
//!
//! Each call writes the image to a temporary PNG and runs
//! `tesseract <png> stdout -l <lang> --psm <n>`.

use std::path::{Path, PathBuf};
use std::process::Command;

use image::{GrayImage, ImageFormat};

use crate::ocr::{OcrError, SegmentationMode, TextBackend};

#[derive(Debug, Clone)]
pub struct TesseractCli {
    binary: PathBuf,
    tessdata: Option<PathBuf>,
}

impl Default for TesseractCli {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("tesseract"),
            tessdata: None,
        }
    }
}

impl TesseractCli {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            tessdata: None,
        }
    }

    /// Directory holding the `*.traineddata` files (`TESSDATA_PREFIX`).
    pub fn with_tessdata(mut self, dir: impl Into<PathBuf>) -> Self {
        self.tessdata = Some(dir.into());
        self
    }

    fn command(&self, input: &Path, language: &str, mode: SegmentationMode) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.arg(input)
            .arg("stdout")
            .arg("-l")
            .arg(language)
            .arg("--psm")
            .arg(mode.psm().to_string());
        if let Some(dir) = &self.tessdata {
            cmd.env("TESSDATA_PREFIX", dir);
        }
        cmd
    }
}

impl TextBackend for TesseractCli {
    fn recognize(
        &self,
        image: &GrayImage,
        language: &str,
        mode: SegmentationMode,
    ) -> Result<String, OcrError> {
        let input = tempfile::Builder::new()
            .prefix("cardscan-ocr-")
            .suffix(".png")
            .tempfile()?;
        image.save_with_format(input.path(), ImageFormat::Png)?;

        let output = self.command(input.path(), language, mode).output()?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(OcrError::Engine(format!(
                "tesseract exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::OsString;

    fn args_of(cmd: &Command) -> Vec<OsString> {
        cmd.get_args().map(|a| a.to_os_string()).collect()
    }

    #[test]
    fn test_command_line() {
        let cli = TesseractCli::default().with_tessdata("/opt/tessdata");
        let cmd = cli.command(Path::new("/tmp/card.png"), "vie+eng", SegmentationMode::SparseText);
        assert_eq!(cmd.get_program(), "tesseract");
        let args = args_of(&cmd);
        assert_eq!(
            args,
            ["/tmp/card.png", "stdout", "-l", "vie+eng", "--psm", "11"]
                .map(OsString::from)
                .to_vec()
        );
        let envs: Vec<_> = cmd.get_envs().collect();
        assert_eq!(envs.len(), 1);
        assert_eq!(envs[0].0, "TESSDATA_PREFIX");
    }

    #[test]
    fn test_missing_binary_is_io_error() {
        let cli = TesseractCli::new("/nonexistent/bin/tesseract");
        let err = cli
            .recognize(&GrayImage::new(8, 8), "eng", SegmentationMode::UniformBlock)
            .unwrap_err();
        assert!(matches!(err, OcrError::Io(_)), "got {err:?}");
    }
}
