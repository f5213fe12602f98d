use std::{
    fs,
    io::{Read, Write},
    path::Path,
    time::Duration,
};

use anyhow::{Context, anyhow};
use indicatif::{ProgressBar, ProgressStyle};
use reqwest::blocking::Client;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ModelKind {
    Segmenter,
    OrientationClassifier,
}

impl ModelKind {
    pub fn label(self) -> &'static str {
        match self {
            ModelKind::Segmenter => "segmentation",
            ModelKind::OrientationClassifier => "orientation classifier",
        }
    }
}

/// Make sure `model_path` exists, fetching it from `url` on first run.
pub fn ensure_model_ready(
    model: ModelKind,
    model_path: &Path,
    url: Option<&str>,
) -> anyhow::Result<()> {
    if model_path.exists() {
        log::debug!("{} model present at {}", model.label(), model_path.display());
        return Ok(());
    }

    let Some(url) = url else {
        return Err(anyhow!(
            "{} model missing at {} and no download url configured",
            model.label(),
            model_path.display()
        ));
    };

    if let Some(parent) = model_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create model directory {}", parent.display()))?;
    }

    download_to_path(model, url, model_path).with_context(|| {
        format!(
            "failed to download {} model to {}",
            model.label(),
            model_path.display()
        )
    })
}

fn download_to_path(model: ModelKind, url: &str, dest: &Path) -> anyhow::Result<()> {
    log::info!(
        "downloading {} model from {url} to {}",
        model.label(),
        dest.display()
    );

    let client = Client::new();
    let mut response = client
        .get(url)
        .send()
        .context("failed to start model download")?
        .error_for_status()
        .context("model download returned error status")?;

    let progress = create_progress_bar(response.content_length());

    let tmp_path = dest.with_extension("download");
    let mut file = fs::File::create(&tmp_path)
        .with_context(|| format!("failed to create {}", tmp_path.display()))?;

    let mut downloaded: u64 = 0;
    let mut buffer = [0u8; 16 * 1024];
    loop {
        let bytes_read = response
            .read(&mut buffer)
            .context("failed while reading model bytes")?;
        if bytes_read == 0 {
            break;
        }

        file.write_all(&buffer[..bytes_read])
            .context("failed while writing model to disk")?;
        downloaded += bytes_read as u64;
        progress.set_position(downloaded);
    }

    file.sync_all()
        .context("failed to flush downloaded model to disk")?;
    fs::rename(&tmp_path, dest).with_context(|| {
        format!(
            "failed to move temp model {} into place at {}",
            tmp_path.display(),
            dest.display()
        )
    })?;

    progress.finish_with_message(format!("{} model ready", model.label()));
    Ok(())
}

fn create_progress_bar(total_size: Option<u64>) -> ProgressBar {
    match total_size {
        Some(total) if total > 0 => {
            let pb = ProgressBar::new(total);
            let style = ProgressStyle::with_template(
                "{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {bytes}/{total_bytes} ({eta})",
            )
            .map(|style| style.progress_chars("=>-"))
            .unwrap_or_else(|_| ProgressStyle::default_bar());
            pb.set_style(style);
            pb
        }
        _ => {
            let pb = ProgressBar::new_spinner();
            let style = ProgressStyle::with_template("{spinner:.green} downloading model")
                .unwrap_or_else(|_| ProgressStyle::default_spinner());
            pb.set_style(style);
            pb.enable_steady_tick(Duration::from_millis(100));
            pb
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_present_model_is_left_alone() {
        let path =
            std::env::temp_dir().join(format!("holo-cam-model-{}.onnx", std::process::id()));
        fs::write(&path, b"onnx").unwrap();
        let result = ensure_model_ready(ModelKind::Segmenter, &path, None);
        let content = fs::read(&path).unwrap();
        fs::remove_file(&path).unwrap();
        assert!(result.is_ok());
        assert_eq!(content, b"onnx");
    }

    #[test]
    fn test_missing_model_without_url_fails() {
        let path = Path::new("/nonexistent/holo-cam/face_orientation.onnx");
        let err = ensure_model_ready(ModelKind::OrientationClassifier, path, None).unwrap_err();
        assert!(err.to_string().contains("orientation classifier"));
    }
}
