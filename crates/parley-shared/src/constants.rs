/// Application name
pub const APP_NAME: &str = "Parley";

/// Lifetime of a cached channel access decision, in seconds
pub const ACCESS_CACHE_TTL_SECS: u64 = 30;

/// Maximum attachment size in bytes (5 MiB)
pub const MAX_ATTACHMENT_SIZE: usize = 5 * 1024 * 1024;

/// MIME types accepted as message attachments
pub const ALLOWED_ATTACHMENT_TYPES: [&str; 4] =
    ["image/jpeg", "image/png", "image/gif", "image/webp"];

/// Object storage bucket for message attachments
pub const DEFAULT_ATTACHMENT_BUCKET: &str = "message-attachments";

/// Message body used when an image is sent without a caption
pub const ATTACHMENT_FALLBACK_CAPTION: &str = "Shared an image";

/// Session storage key holding the mirrored message store
pub const MESSAGE_STORAGE_KEY: &str = "message-storage";

/// Page size for the full-text search procedure
pub const SEARCH_PAGE_SIZE: u32 = 20;

/// Number of most recent notifications fetched per user
pub const NOTIFICATION_PAGE_SIZE: u32 = 50;

/// Window used when asking the backend for unread counts, in hours
pub const UNREAD_WINDOW_HOURS: i64 = 24;

/// Buffer size of the realtime event channel per subscription
pub const REALTIME_CHANNEL_CAPACITY: usize = 256;

/// Buffer size of the user notice broadcast channel
pub const NOTICE_CHANNEL_CAPACITY: usize = 64;

/// Default backend endpoint for local development
pub const DEFAULT_BACKEND_URL: &str = "http://localhost:54321";
