/// Application name
pub const APP_NAME: &str = "Agency Hub";

/// Default HTTP / WebSocket port
pub const DEFAULT_HTTP_PORT: u16 = 8080;

/// Room left in a WebSocket frame for the JSON envelope around a base64
/// attachment (event tag, ids, data URL prefix, file name)
pub const FRAME_OVERHEAD: usize = 64 * 1024;

/// Default ceiling for a single chat attachment (10 MiB)
pub const DEFAULT_MAX_MEDIA_SIZE: usize = 10 * 1024 * 1024;

/// Directory (relative to the working directory) where chat media lands
pub const DEFAULT_UPLOADS_DIR: &str = "uploads";

/// URL prefix stored in `image_url` / `document_url` / `audio_url`
pub const UPLOADS_URL_PREFIX: &str = "uploads/";

/// Default page size for notification listing
pub const DEFAULT_PAGE_SIZE: u32 = 20;

/// Upper bound on a requested page size
pub const MAX_PAGE_SIZE: u32 = 200;

/// Text pushed with `CHAT_CLEARED`
pub const CHAT_CLEARED_TEXT: &str = "Chat cleared successfully";

/// Text pushed with `CANNOT_DELETE`
pub const CANNOT_DELETE_TEXT: &str = "Message has already been seen and cannot be deleted";
