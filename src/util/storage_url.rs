//! Storage reference codec: public object URLs, object paths and inline
//! `data:` payloads.
use std::sync::OnceLock;

use base64::Engine as _;
use regex::Regex;

/// Fixed path segment every public object URL carries.
pub const PUBLIC_PREFIX: &str = "/storage/v1/object/public/";

/// Bucket + object path pair addressing one stored object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectLocation {
    pub bucket: String,
    pub path: String,
}

/// Decoded inline payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InlinePayload {
    pub mime_type: String,
    pub extension: &'static str,
    pub bytes: Vec<u8>,
}

/// Strip every leading `/` or `\` and turn remaining backslashes into `/`.
/// `None` when nothing is left.
pub fn normalize_path(input: &str) -> Option<String> {
    let trimmed = input.trim_start_matches(['/', '\\']);
    if trimmed.is_empty() {
        return None;
    }
    Some(trimmed.replace('\\', "/"))
}

/// Locate `bucket` and `path` inside a public object URL. Segments are kept
/// as they appear in the URL; `%XX` escapes are part of the object key.
///
/// Anything that is not an absolute URL, lacks the public prefix, or has an
/// empty bucket/path yields `None` ("no reference").
pub fn parse_public_url(raw: &str) -> Option<ObjectLocation> {
    let url = url::Url::parse(raw.trim()).ok()?;
    let pathname = url.path();
    let idx = pathname.find(PUBLIC_PREFIX)?;
    let relative = &pathname[idx + PUBLIC_PREFIX.len()..];
    let (bucket, rest) = relative.split_once('/')?;
    if bucket.is_empty() || rest.is_empty() {
        return None;
    }
    Some(ObjectLocation {
        bucket: bucket.to_string(),
        path: rest.to_string(),
    })
}

/// Inverse of [`parse_public_url`]: `<base>/storage/v1/object/public/<bucket>/<path>`.
pub fn build_public_url(project_base: &str, bucket: &str, object_path: &str) -> Option<String> {
    if project_base.is_empty() || bucket.is_empty() {
        return None;
    }
    let path = normalize_path(object_path)?;
    let base = project_base.strip_suffix('/').unwrap_or(project_base);
    Some(format!("{base}{PUBLIC_PREFIX}{bucket}/{path}"))
}

fn data_url_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)^data:([^;,]+);base64,(.*)$").expect("static regex"))
}

/// Prefix check only; the payload is validated by [`decode_data_url`].
pub fn is_data_url(value: &str) -> bool {
    value.starts_with("data:") && data_url_re().is_match(value)
}

/// Decode `data:<mime>;base64,<payload>`.
///
/// `Ok(None)` when the value is not a data URL at all, `Err` when it is one but
/// the payload does not decode.
pub fn decode_data_url(value: &str) -> Result<Option<InlinePayload>, base64::DecodeError> {
    let Some(caps) = data_url_re().captures(value) else {
        return Ok(None);
    };
    let mime_type = caps[1].trim().to_ascii_lowercase();
    let payload: String = caps[2].chars().filter(|c| !c.is_ascii_whitespace()).collect();
    let bytes = base64::engine::general_purpose::STANDARD.decode(payload.as_bytes())?;
    let extension = mime_to_extension(&mime_type);
    Ok(Some(InlinePayload {
        mime_type,
        extension,
        bytes,
    }))
}

pub fn mime_to_extension(mime_type: &str) -> &'static str {
    match mime_type {
        "image/png" => "png",
        "image/jpeg" | "image/jpg" => "jpg",
        "image/webp" => "webp",
        "image/gif" => "gif",
        _ => "bin",
    }
}

/// Content type for an upload, from the object's file extension.
pub fn content_type_for_path(path: &str) -> &'static str {
    let ext = path
        .rsplit('/')
        .next()
        .and_then(|name| name.rsplit_once('.'))
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "webp" => "image/webp",
        "gif" => "image/gif",
        "bmp" => "image/bmp",
        "svg" => "image/svg+xml",
        "pdf" => "application/pdf",
        "doc" => "application/msword",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "wav" => "audio/wav",
        "mp3" => "audio/mpeg",
        "ogg" => "audio/ogg",
        "webm" => "audio/webm",
        "m4a" => "audio/mp4",
        "txt" => "text/plain",
        _ => "application/octet-stream",
    }
}

/// Swap the extension of the last path segment (or append one).
pub fn with_extension(path: &str, extension: &str) -> String {
    let (dir, name) = match path.rsplit_once('/') {
        Some((dir, name)) => (Some(dir), name),
        None => (None, path),
    };
    let stem = match name.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem,
        _ => name,
    };
    match dir {
        Some(dir) => format!("{dir}/{stem}.{extension}"),
        None => format!("{stem}.{extension}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_path_strips_leading_separators() {
        assert_eq!(normalize_path("/a/b").as_deref(), Some("a/b"));
        assert_eq!(normalize_path("\\a\\b").as_deref(), Some("a/b"));
        assert_eq!(normalize_path("//\\/x\\y/z").as_deref(), Some("x/y/z"));
        assert_eq!(normalize_path("a/b").as_deref(), Some("a/b"));
    }

    #[test]
    fn normalize_path_empty_is_none() {
        assert_eq!(normalize_path(""), None);
        assert_eq!(normalize_path("///"), None);
    }

    #[test]
    fn parses_public_urls() {
        let url = "https://proj.example.co/storage/v1/object/public/resumes/123/resume.pdf";
        assert_eq!(
            parse_public_url(url),
            Some(ObjectLocation {
                bucket: "resumes".into(),
                path: "123/resume.pdf".into()
            })
        );
    }

    #[test]
    fn parse_rejects_non_references() {
        assert_eq!(parse_public_url("not a url"), None);
        assert_eq!(parse_public_url("https://x/y"), None);
        assert_eq!(
            parse_public_url("https://proj.example.co/storage/v1/object/public/resumes"),
            None
        );
        assert_eq!(
            parse_public_url("https://proj.example.co/storage/v1/object/public/resumes/"),
            None
        );
        assert_eq!(
            parse_public_url("https://proj.example.co/storage/v1/object/public//a.pdf"),
            None
        );
        assert_eq!(
            parse_public_url("https://proj.example.co/storage/v1/object/sign/resumes/a.pdf"),
            None
        );
    }

    #[test]
    fn builds_public_urls() {
        assert_eq!(
            build_public_url("https://proj.example.co/", "avatars", "u1/a.png").as_deref(),
            Some("https://proj.example.co/storage/v1/object/public/avatars/u1/a.png")
        );
        assert_eq!(
            build_public_url("https://proj.example.co", "avatars", "\\u1\\a.png").as_deref(),
            Some("https://proj.example.co/storage/v1/object/public/avatars/u1/a.png")
        );
        assert_eq!(build_public_url("https://proj.example.co", "", "a.png"), None);
        assert_eq!(build_public_url("https://proj.example.co", "avatars", "/"), None);
    }

    #[test]
    fn public_url_round_trip() {
        let bases = [
            "https://proj.example.co",
            "https://proj.example.co/",
            "http://localhost:54321",
            "https://a.b.c.example.org/",
        ];
        let buckets = ["resumes", "avatars", "interview-audio", "b1"];
        let paths = [
            "a.pdf",
            "/123/resume.pdf",
            "\\u1\\avatar.png",
            "x/y/z/w/file_name-1.wav",
            "//deep//nested/path.bin",
            "u1/100%41off.png",
            "a%2Fb.pdf",
        ];
        for base in bases {
            for bucket in buckets {
                for path in paths {
                    let url = build_public_url(base, bucket, path).unwrap();
                    let parsed = parse_public_url(&url).unwrap();
                    assert_eq!(parsed.bucket, bucket);
                    assert_eq!(Some(parsed.path), normalize_path(path), "{url}");
                }
            }
        }
    }

    #[test]
    fn escaped_segments_stay_part_of_the_key() {
        let url = build_public_url("https://proj.example.co", "avatars", "u1/100%41off.png").unwrap();
        assert_eq!(parse_public_url(&url).unwrap().path, "u1/100%41off.png");

        let parsed =
            parse_public_url("https://p.example.co/storage/v1/object/public/resumes/9/a%2Fb.pdf")
                .unwrap();
        assert_eq!(parsed.path, "9/a%2Fb.pdf");
    }

    #[test]
    fn decodes_data_urls() {
        let payload = decode_data_url("data:image/png;base64,AAAA").unwrap().unwrap();
        assert_eq!(payload.mime_type, "image/png");
        assert_eq!(payload.extension, "png");
        assert_eq!(payload.bytes, vec![0u8, 0, 0]);

        let jpg = decode_data_url("data:image/jpg;base64,/9j/").unwrap().unwrap();
        assert_eq!(jpg.extension, "jpg");
        let other = decode_data_url("data:application/x-foo;base64,AQID").unwrap().unwrap();
        assert_eq!(other.extension, "bin");
        assert_eq!(other.bytes, vec![1u8, 2, 3]);
    }

    #[test]
    fn data_url_detection() {
        assert!(is_data_url("data:image/png;base64,AAAA"));
        assert!(!is_data_url("data:image/png,AAAA"));
        assert!(!is_data_url("https://proj.example.co/a.png"));
        assert_eq!(decode_data_url("https://proj.example.co/a.png").unwrap(), None);
        assert!(decode_data_url("data:image/png;base64,@@@").is_err());
    }

    #[test]
    fn extension_swap_and_content_types() {
        assert_eq!(with_extension("u1/a.png", "jpg"), "u1/a.jpg");
        assert_eq!(with_extension("a.b/c", "jpg"), "a.b/c.jpg");
        assert_eq!(with_extension("photo", "jpg"), "photo.jpg");
        assert_eq!(content_type_for_path("123/resume.PDF"), "application/pdf");
        assert_eq!(content_type_for_path("x/rec.wav"), "audio/wav");
        assert_eq!(content_type_for_path("x/noext"), "application/octet-stream");
    }
}
