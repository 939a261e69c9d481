use crate::{error::Result, io::progress::emit_download_progress};

use reqwest::blocking::Client;
use std::{
    fs::{self, File},
    io::{BufWriter, Read, Write},
    path::Path,
    time::Duration,
};

const USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

/// Blocking HTTP client shared by model downloads and storage uploads.
pub fn http_client() -> Client {
    Client::builder()
        .user_agent(USER_AGENT)
        .connect_timeout(Duration::from_secs(30))
        .timeout(Duration::from_secs(60 * 30))
        .build()
        .unwrap_or_else(|_| Client::new())
}

/// Stream `url` into `dest`, reporting progress through the download callback.
/// Data lands in `<dest>.part` first and is renamed once complete.
pub fn download_with_progress(client: &Client, url: &str, dest: &Path) -> Result<()> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }

    tracing::info!(%url, dest = %dest.display(), "downloading model");
    let mut resp = client.get(url).send()?.error_for_status()?;
    let total = resp.content_length().unwrap_or(0);

    let part = dest.with_extension(match dest.extension() {
        Some(ext) => format!("{}.part", ext.to_string_lossy()),
        None => "part".to_string(),
    });

    let result = (|| -> Result<u64> {
        let mut out = BufWriter::new(File::create(&part)?);
        let mut buf = vec![0u8; 256 * 1024];
        let mut done = 0u64;
        emit_download_progress(0, total);
        loop {
            let n = resp.read(&mut buf)?;
            if n == 0 {
                break;
            }
            out.write_all(&buf[..n])?;
            done += n as u64;
            emit_download_progress(done, total);
        }
        out.flush()?;
        Ok(done)
    })();

    match result {
        Ok(done) => {
            fs::rename(&part, dest)?;
            tracing::debug!(bytes = done, "download complete");
            Ok(())
        }
        Err(e) => {
            let _ = fs::remove_file(&part);
            Err(e)
        }
    }
}
