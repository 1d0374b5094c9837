//! The file persistence agent.
//!
//! Accepts binary or text uploads, derives a 32-hex-character file id, and
//! shards files into `<home>/<id[:2]>/<id>-<filename>`. The reply echoes
//! the upload's sidecar plus the issued file info, so pipeline callers can
//! thread their own fields through the exchange.

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use rand::Rng;
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use wastepro_core::{AgentBehavior, AgentHandle, Body, Parcel, Result};

pub const TOPIC_FILE_UPLOAD: &str = "FileUpload/FileService/Services";

pub struct FileService {
    home: PathBuf,
}

impl FileService {
    pub fn new(home: impl Into<PathBuf>) -> Self {
        Self { home: home.into() }
    }

    fn generate_file_id(filename: &str) -> String {
        let epoch_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or_default();
        let salt: u16 = rand::thread_rng().gen_range(0..1000);
        let digest = Sha256::digest(format!("{filename}{epoch_ms}{salt:03}"));
        hex::encode(digest)[..32].to_string()
    }

    fn mime_type(filename: &str) -> &'static str {
        let extension = Path::new(filename)
            .extension()
            .and_then(|ext| ext.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();
        match extension.as_str() {
            "pdf" => "application/pdf",
            "txt" => "text/plain",
            "md" => "text/markdown",
            "html" | "htm" => "text/html",
            "json" => "application/json",
            "csv" => "text/csv",
            "png" => "image/png",
            "jpg" | "jpeg" => "image/jpeg",
            _ => "application/octet-stream",
        }
    }

    async fn save(&self, parcel: &Parcel) -> Result<Map<String, Value>> {
        let filename = parcel
            .get("filename")
            .and_then(Value::as_str)
            .ok_or_else(|| wastepro_core::Error::Codec("upload carries no filename".into()))?
            .to_string();

        let (bytes, encoding): (Vec<u8>, &str) = match &parcel.body {
            Body::Binary { payload, .. } => (payload.clone(), "binary"),
            Body::Text(content) => {
                let text = content
                    .get("content")
                    .and_then(Value::as_str)
                    .ok_or_else(|| {
                        wastepro_core::Error::Codec("text upload carries no content".into())
                    })?;
                (text.as_bytes().to_vec(), "utf-8")
            }
        };

        let file_id = Self::generate_file_id(&filename);
        let shard = self.home.join(&file_id[..2]);
        tokio::fs::create_dir_all(&shard).await?;
        let file_path = shard.join(format!("{file_id}-{filename}"));
        tokio::fs::write(&file_path, &bytes).await?;
        info!(file_id, path = %file_path.display(), size = bytes.len(), "file saved");

        // Sidecar first, then the issued file info on top.
        let mut reply = match &parcel.body {
            Body::Binary { sidecar, .. } => sidecar.clone(),
            Body::Text(Value::Object(map)) => {
                let mut map = map.clone();
                map.remove("content");
                map
            }
            _ => Map::new(),
        };
        reply.insert("file_id".into(), json!(file_id));
        reply.insert("filename".into(), json!(filename));
        reply.insert("file_path".into(), json!(file_path.to_string_lossy()));
        reply.insert("mime_type".into(), json!(Self::mime_type(&filename)));
        reply.insert("encoding".into(), json!(encoding));
        Ok(reply)
    }
}

#[async_trait]
impl AgentBehavior for FileService {
    fn name(&self) -> &str {
        "file_service.services.wastepro"
    }

    async fn on_activate(&self, agent: &AgentHandle) -> Result<()> {
        agent.subscribe(TOPIC_FILE_UPLOAD).await
    }

    async fn on_message(
        &self,
        _agent: &AgentHandle,
        topic: &str,
        parcel: Parcel,
    ) -> Result<Option<Parcel>> {
        debug!(topic, filename = ?parcel.get("filename"), "upload received");
        match self.save(&parcel).await {
            Ok(reply) => Ok(Some(reply.into())),
            Err(e) => Ok(Some(Parcel::error("FileIOError", e.to_string()))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_ids_are_32_hex_chars_and_unique() {
        let a = FileService::generate_file_id("a.pdf");
        let b = FileService::generate_file_id("a.pdf");
        assert_eq!(a.len(), 32);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }

    #[test]
    fn mime_type_follows_extension() {
        assert_eq!(FileService::mime_type("report.PDF"), "application/pdf");
        assert_eq!(FileService::mime_type("notes.txt"), "text/plain");
        assert_eq!(FileService::mime_type("blob"), "application/octet-stream");
    }

    #[tokio::test]
    async fn save_shards_by_id_prefix_and_echoes_sidecar() {
        let home = tempfile::tempdir().unwrap();
        let service = FileService::new(home.path());

        let mut sidecar = Map::new();
        sidecar.insert("filename".into(), json!("a.pdf"));
        sidecar.insert("kg_name".into(), json!("K"));
        let parcel = Parcel::binary(b"%PDF-1.4".to_vec(), sidecar);

        let reply = service.save(&parcel).await.unwrap();
        let file_id = reply["file_id"].as_str().unwrap();
        let file_path = PathBuf::from(reply["file_path"].as_str().unwrap());

        assert!(file_path.exists());
        assert!(file_path
            .parent()
            .unwrap()
            .ends_with(&file_id[..2]));
        assert_eq!(reply["kg_name"], json!("K"));
        assert_eq!(reply["mime_type"], json!("application/pdf"));
        assert_eq!(reply["encoding"], json!("binary"));
    }

    #[tokio::test]
    async fn text_uploads_are_written_utf8() {
        let home = tempfile::tempdir().unwrap();
        let service = FileService::new(home.path());

        let parcel = Parcel::text(json!({
            "filename": "note.txt",
            "content": "The cat is on the mat.",
        }));
        let reply = service.save(&parcel).await.unwrap();
        assert_eq!(reply["encoding"], json!("utf-8"));
        let written =
            std::fs::read_to_string(reply["file_path"].as_str().unwrap()).unwrap();
        assert_eq!(written, "The cat is on the mat.");
        // The consumed content field is not echoed back.
        assert!(reply.get("content").is_none());
    }
}
