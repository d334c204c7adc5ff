//! Application configuration.
//!
//! Every section follows the same pattern: a struct with sensible defaults
//! plus `from_env_or_default()` overrides, so the server boots without a
//! config file and deployments tune it through the environment.

/// Upload validation limits.
#[derive(Debug, Clone)]
pub struct UploadConfig {
    /// Maximum accepted upload size in bytes.
    pub max_upload_size: u64,
    /// Accepted MIME types for video content.
    pub allowed_video_formats: Vec<String>,
    /// Accepted MIME types for presentation content.
    pub allowed_presentation_formats: Vec<String>,
    /// Accepted MIME types for thumbnail images.
    pub allowed_image_formats: Vec<String>,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_upload_size: 2 * 1024 * 1024 * 1024, // 2GB
            allowed_video_formats: vec!["video/mp4".into(), "video/webm".into()],
            allowed_presentation_formats: vec![
                "application/vnd.ms-powerpoint".into(),
                "application/vnd.openxmlformats-officedocument.presentationml.presentation"
                    .into(),
                "application/pdf".into(),
            ],
            allowed_image_formats: vec![
                "image/jpeg".into(),
                "image/png".into(),
                "image/webp".into(),
            ],
        }
    }
}

impl UploadConfig {
    pub fn from_env_or_default() -> Self {
        let mut config = Self::default();
        if let Ok(raw) = std::env::var("MAX_UPLOAD_SIZE")
            && let Ok(parsed) = raw.parse::<u64>()
        {
            config.max_upload_size = parsed;
        }
        config
    }
}

/// Object store connection settings.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Base endpoint for object writes (S3-compatible HTTP endpoint).
    pub endpoint: String,
    /// Bucket name appended to the endpoint for object keys.
    pub bucket: String,
    /// Public base URL objects are served from.
    pub cdn_url: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:9000".to_string(),
            bucket: "lms-content".to_string(),
            cdn_url: "http://localhost:9000/lms-content".to_string(),
        }
    }
}

impl StorageConfig {
    pub fn from_env_or_default() -> Self {
        let mut config = Self::default();
        if let Ok(endpoint) = std::env::var("S3_ENDPOINT")
            && !endpoint.trim().is_empty()
        {
            config.endpoint = endpoint;
        }
        if let Ok(bucket) = std::env::var("S3_BUCKET")
            && !bucket.trim().is_empty()
        {
            config.bucket = bucket;
        }
        if let Ok(cdn) = std::env::var("CDN_URL")
            && !cdn.trim().is_empty()
        {
            config.cdn_url = cdn;
        }
        config
    }
}

/// Media tool paths and pipeline tunables.
#[derive(Debug, Clone)]
pub struct MediaConfig {
    /// Path to the ffmpeg binary.
    pub ffmpeg_path: String,
    /// Path to the ffprobe binary.
    pub ffprobe_path: String,
    /// Preview clip length in seconds when the enqueue request doesn't set one.
    pub preview_duration_secs: u32,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: "ffmpeg".to_string(),
            ffprobe_path: "ffprobe".to_string(),
            preview_duration_secs: 10,
        }
    }
}

impl MediaConfig {
    pub fn from_env_or_default() -> Self {
        let mut config = Self::default();
        if let Ok(path) = std::env::var("FFMPEG_PATH")
            && !path.trim().is_empty()
        {
            config.ffmpeg_path = path;
        }
        if let Ok(path) = std::env::var("FFPROBE_PATH")
            && !path.trim().is_empty()
        {
            config.ffprobe_path = path;
        }
        config
    }
}

/// Search index endpoint settings.
#[derive(Debug, Clone)]
pub struct SearchConfig {
    /// Base URL of the document index service.
    pub base_url: String,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:7700".to_string(),
        }
    }
}

impl SearchConfig {
    pub fn from_env_or_default() -> Self {
        let mut config = Self::default();
        if let Ok(url) = std::env::var("SEARCH_URL")
            && !url.trim().is_empty()
        {
            config.base_url = url;
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upload_defaults_allow_mp4_and_webm() {
        let config = UploadConfig::default();
        assert!(config.allowed_video_formats.contains(&"video/mp4".to_string()));
        assert!(config.allowed_video_formats.contains(&"video/webm".to_string()));
        assert_eq!(config.max_upload_size, 2 * 1024 * 1024 * 1024);
    }

    #[test]
    fn media_defaults_use_path_lookup() {
        let config = MediaConfig::default();
        assert_eq!(config.ffmpeg_path, "ffmpeg");
        assert_eq!(config.preview_duration_secs, 10);
    }
}
