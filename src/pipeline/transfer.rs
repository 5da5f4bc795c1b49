//! Object copy from source storage to destination storage: resolve bytes,
//! optionally normalize, upload, rebuild the public URL.
use std::path::{Component, Path, PathBuf};

use bytes::Bytes;
use serde_json::Value;
use tracing::debug;

use crate::backend::ObjectStore;
use crate::error::{MigrateError, MigrateResult};
use crate::normalization::{normalize, NormalizeLimits};
use crate::pipeline::job::TransferField;
use crate::pipeline::retry::RetryExecutor;
use crate::util::storage_url::{
    build_public_url, content_type_for_path, decode_data_url, normalize_path, parse_public_url,
    with_extension, InlinePayload, ObjectLocation,
};

/// A field value that points at binary content.
#[derive(Debug, Clone, PartialEq)]
pub enum TransferReference {
    StorageObject { field: String, location: ObjectLocation },
    Inline { field: String, payload: InlinePayload },
}

impl TransferReference {
    /// Recognise a reference in `value`.
    ///
    /// `Ok(None)` means "nothing to transfer": not a string, not a public
    /// object URL, or an inline payload on a field that takes none. A value
    /// that claims to be a `data:` URL but does not decode is an error.
    pub fn parse(spec: &TransferField, value: &Value) -> MigrateResult<Option<Self>> {
        let Some(raw) = value.as_str().map(str::trim) else {
            return Ok(None);
        };
        if raw.starts_with("data:") {
            if spec.inline_bucket.is_none() {
                return Ok(None);
            }
            return match decode_data_url(raw) {
                Ok(Some(payload)) => Ok(Some(TransferReference::Inline {
                    field: spec.field.to_string(),
                    payload,
                })),
                Ok(None) => Err(MigrateError::validation(spec.field, "malformed data URL header")),
                Err(err) => Err(MigrateError::validation(
                    spec.field,
                    format!("base64 payload does not decode: {err}"),
                )),
            };
        }
        Ok(parse_public_url(raw).map(|location| TransferReference::StorageObject {
            field: spec.field.to_string(),
            location,
        }))
    }

    pub fn field(&self) -> &str {
        match self {
            TransferReference::StorageObject { field, .. } | TransferReference::Inline { field, .. } => field,
        }
    }

    /// Source location, for logging. Inline payloads have none.
    pub fn location(&self) -> Option<&ObjectLocation> {
        match self {
            TransferReference::StorageObject { location, .. } => Some(location),
            TransferReference::Inline { .. } => None,
        }
    }
}

/// Outcome of one successful transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferredObject {
    pub url: String,
    pub bucket: String,
    pub path: String,
    pub content_type: String,
    pub size: usize,
}

pub struct ObjectTransferPipeline<'a> {
    source: &'a dyn ObjectStore,
    destination: &'a dyn ObjectStore,
    retry: &'a RetryExecutor,
    /// Destination project base URL for public links.
    public_base: &'a str,
    staging_dir: &'a Path,
    limits: &'a NormalizeLimits,
}

impl<'a> ObjectTransferPipeline<'a> {
    pub fn new(
        source: &'a dyn ObjectStore,
        destination: &'a dyn ObjectStore,
        retry: &'a RetryExecutor,
        public_base: &'a str,
        staging_dir: &'a Path,
        limits: &'a NormalizeLimits,
    ) -> Self {
        Self {
            source,
            destination,
            retry,
            public_base,
            staging_dir,
            limits,
        }
    }

    /// Copy the object behind `reference` and return its destination URL.
    ///
    /// `key` is the row key; inline payloads are stored under it.
    pub async fn transfer(
        &self,
        key: &str,
        spec: &TransferField,
        reference: &TransferReference,
    ) -> MigrateResult<TransferredObject> {
        let (bucket, path, bytes, content_type) = match reference {
            TransferReference::StorageObject { location, .. } => {
                let path = normalize_path(&location.path)
                    .ok_or_else(|| MigrateError::validation(spec.field, "empty object path"))?;
                let label = format!("{}: download {}/{}", self.source.name(), location.bucket, path);
                let bytes = self
                    .retry
                    .execute(&label, || self.source.download(&location.bucket, &path))
                    .await?;
                self.stage_locally(&location.bucket, &path, &bytes).await?;
                let content_type = content_type_for_path(&path).to_string();
                (location.bucket.clone(), path, bytes.to_vec(), content_type)
            }
            TransferReference::Inline { payload, .. } => {
                let bucket = spec.inline_bucket.ok_or_else(|| {
                    MigrateError::validation(spec.field, "inline payload without a target bucket")
                })?;
                let path = normalize_path(&format!("{key}/{}.{}", spec.inline_stem, payload.extension))
                    .ok_or_else(|| MigrateError::validation(spec.field, "empty row key"))?;
                (
                    bucket.to_string(),
                    path,
                    payload.bytes.clone(),
                    payload.mime_type.clone(),
                )
            }
        };

        let (path, bytes, content_type) = if spec.normalize {
            let out = normalize(&bytes, &content_type, self.limits);
            if out.changed() {
                (with_extension(&path, out.extension), out.bytes, out.mime_type)
            } else {
                (path, bytes, content_type)
            }
        } else {
            (path, bytes, content_type)
        };

        let size = bytes.len();
        let body = Bytes::from(bytes);
        let label = format!("{}: upload {}/{}", self.destination.name(), bucket, path);
        self.retry
            .execute(&label, || {
                self.destination
                    .upload(&bucket, &path, body.clone(), &content_type)
            })
            .await?;

        let url = build_public_url(self.public_base, &bucket, &path)
            .ok_or_else(|| MigrateError::validation(spec.field, "cannot build destination URL"))?;
        debug!(key, field = spec.field, bucket = %bucket, path = %path, size, "object transferred");
        Ok(TransferredObject {
            url,
            bucket,
            path,
            content_type,
            size,
        })
    }

    /// Keep a copy under `<staging_dir>/<bucket>/<path>`; reruns overwrite it.
    async fn stage_locally(&self, bucket: &str, path: &str, bytes: &[u8]) -> MigrateResult<PathBuf> {
        let local = staging_path(self.staging_dir, bucket, path)?;
        let io_err = |source| MigrateError::Staging {
            path: local.display().to_string(),
            source,
        };
        if let Some(parent) = local.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
        }
        tokio::fs::write(&local, bytes).await.map_err(io_err)?;
        Ok(local)
    }
}

/// Deterministic local path for an object. Segments that would climb out of
/// the staging directory are refused.
fn staging_path(root: &Path, bucket: &str, path: &str) -> MigrateResult<PathBuf> {
    let relative = Path::new(bucket).join(path);
    let escapes = relative
        .components()
        .any(|c| !matches!(c, Component::Normal(_)));
    if escapes {
        return Err(MigrateError::validation(
            "path",
            format!("object path {bucket}/{path} leaves the staging directory"),
        ));
    }
    Ok(root.join(relative))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::memory::MemoryObjects;
    use crate::pipeline::retry::test_support::instant_executor;
    use serde_json::json;
    use std::io::Cursor;

    const RESUME: TransferField = TransferField::object("resume_url");
    const AVATAR: TransferField = TransferField {
        field: "avatar_url",
        normalize: true,
        inline_bucket: Some("avatars"),
        inline_stem: "avatar",
    };

    struct Fixture {
        source: MemoryObjects,
        destination: MemoryObjects,
        dir: tempfile::TempDir,
        limits: NormalizeLimits,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                source: MemoryObjects::new(),
                destination: MemoryObjects::new(),
                dir: tempfile::tempdir().unwrap(),
                limits: NormalizeLimits::default(),
            }
        }

        async fn run(
            &self,
            key: &str,
            spec: &TransferField,
            reference: &TransferReference,
        ) -> MigrateResult<TransferredObject> {
            let retry = instant_executor(1);
            ObjectTransferPipeline::new(
                &self.source,
                &self.destination,
                &retry,
                "https://new.example.co/",
                self.dir.path(),
                &self.limits,
            )
            .transfer(key, spec, reference)
            .await
        }
    }

    fn parse(spec: &TransferField, value: Value) -> TransferReference {
        TransferReference::parse(spec, &value).unwrap().unwrap()
    }

    #[test]
    fn parse_recognises_references() {
        let r = parse(
            &RESUME,
            json!("https://old.example.co/storage/v1/object/public/resumes/12/cv.pdf"),
        );
        assert_eq!(r.field(), "resume_url");
        assert_eq!(
            r.location(),
            Some(&ObjectLocation {
                bucket: "resumes".into(),
                path: "12/cv.pdf".into()
            })
        );
        let inline = parse(&AVATAR, json!("data:image/png;base64,AAAA"));
        assert!(inline.location().is_none());
    }

    #[test]
    fn parse_ignores_non_references() {
        for value in [
            json!(null),
            json!(3),
            json!(""),
            json!("https://lh3.googleusercontent.com/a/photo.jpg"),
            json!("data:image/png;base64,AAAA"),
        ] {
            assert_eq!(TransferReference::parse(&RESUME, &value).unwrap(), None);
        }
    }

    #[test]
    fn parse_rejects_undecodable_inline_payload() {
        for bad in ["data:image/png;base64,@@@@", "data:;base64,AAAA", "data:image/png,AAAA"] {
            let err = TransferReference::parse(&AVATAR, &json!(bad)).unwrap_err();
            assert!(matches!(err, MigrateError::PermanentValidation { .. }), "{bad}");
        }
    }

    #[tokio::test]
    async fn copies_stored_object_and_builds_destination_url() {
        let fx = Fixture::new();
        fx.source.put("resumes", "12/cv.pdf", &b"%PDF-1.4"[..], "application/pdf");
        let reference = parse(
            &RESUME,
            json!("https://old.example.co/storage/v1/object/public/resumes/12/cv.pdf"),
        );
        let out = fx.run("12", &RESUME, &reference).await.unwrap();
        assert_eq!(out.url, "https://new.example.co/storage/v1/object/public/resumes/12/cv.pdf");
        assert_eq!(out.content_type, "application/pdf");
        let (bytes, ct) = fx.destination.get("resumes", "12/cv.pdf").unwrap();
        assert_eq!(&bytes[..], b"%PDF-1.4");
        assert_eq!(ct, "application/pdf");
        let staged = fx.dir.path().join("resumes").join("12").join("cv.pdf");
        assert_eq!(std::fs::read(staged).unwrap(), b"%PDF-1.4");
    }

    #[tokio::test]
    async fn rerun_overwrites_the_same_staging_file() {
        let fx = Fixture::new();
        fx.source.put("resumes", "a.pdf", &b"one"[..], "application/pdf");
        let reference = parse(
            &RESUME,
            json!("https://old.example.co/storage/v1/object/public/resumes/a.pdf"),
        );
        fx.run("1", &RESUME, &reference).await.unwrap();
        fx.source.put("resumes", "a.pdf", &b"two"[..], "application/pdf");
        fx.run("1", &RESUME, &reference).await.unwrap();
        assert_eq!(std::fs::read(fx.dir.path().join("resumes/a.pdf")).unwrap(), b"two");
        assert_eq!(fx.destination.len(), 1);
    }

    #[tokio::test]
    async fn inline_payload_lands_under_row_key() {
        let fx = Fixture::new();
        let reference = parse(&AVATAR, json!("data:image/png;base64,AAAA"));
        // within budget, so the payload is uploaded as decoded
        let out = fx.run("u1", &AVATAR, &reference).await.unwrap();
        assert_eq!(out.path, "u1/avatar.png");
        assert_eq!(out.url, "https://new.example.co/storage/v1/object/public/avatars/u1/avatar.png");
        let (bytes, ct) = fx.destination.get("avatars", "u1/avatar.png").unwrap();
        assert_eq!(&bytes[..], &[0u8, 0, 0]);
        assert_eq!(ct, "image/png");
    }

    #[tokio::test]
    async fn normalization_may_change_the_extension() {
        let fx = Fixture::new();
        let img = image::DynamicImage::ImageRgba8(image::RgbaImage::from_pixel(
            4,
            4,
            image::Rgba([200, 10, 10, 255]),
        ));
        let mut gif = Cursor::new(Vec::new());
        img.write_to(&mut gif, image::ImageFormat::Gif).unwrap();
        fx.source.put("avatars", "u2/me.gif", gif.into_inner(), "image/gif");
        let reference = parse(
            &AVATAR,
            json!("https://old.example.co/storage/v1/object/public/avatars/u2/me.gif"),
        );
        let out = fx.run("u2", &AVATAR, &reference).await.unwrap();
        assert_eq!(out.path, "u2/me.jpg");
        assert_eq!(out.content_type, "image/jpeg");
        assert!(fx.destination.get("avatars", "u2/me.jpg").is_some());
    }

    #[tokio::test]
    async fn missing_source_object_exhausts_retries() {
        let fx = Fixture::new();
        let reference = parse(
            &RESUME,
            json!("https://old.example.co/storage/v1/object/public/resumes/gone.pdf"),
        );
        let err = fx.run("9", &RESUME, &reference).await.unwrap_err();
        assert!(matches!(err, MigrateError::ExhaustedRetry { attempts: 2, .. }));
        assert_eq!(fx.source.download_count(), 2);
        assert_eq!(fx.destination.len(), 0);
    }

    #[tokio::test]
    async fn upload_failures_are_retried() {
        let fx = Fixture::new();
        fx.source.put("resumes", "b.pdf", &b"x"[..], "application/pdf");
        fx.destination.fail_uploads("resumes", 1);
        let reference = parse(
            &RESUME,
            json!("https://old.example.co/storage/v1/object/public/resumes/b.pdf"),
        );
        fx.run("1", &RESUME, &reference).await.unwrap();
        assert!(fx.destination.get("resumes", "b.pdf").is_some());
    }

    #[test]
    fn staging_path_refuses_traversal() {
        let root = Path::new("tmp");
        assert_eq!(
            staging_path(root, "resumes", "1/cv.pdf").unwrap(),
            PathBuf::from("tmp/resumes/1/cv.pdf")
        );
        assert!(staging_path(root, "resumes", "../../etc/passwd").is_err());
        assert!(staging_path(root, "..", "x").is_err());
    }
}
