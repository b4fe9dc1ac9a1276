pub const VIDEO_EXTENSIONS: &[&str] = &[
    "mkv", "mp4", "avi", "webm", "mov", "wmv", "flv", "m4v", "mpg", "mpeg", "ts", "m2ts", "ogv",
    "divx",
];

pub mod fingerprint {

    /// Size of the head and tail blocks that are summed.
    pub const CHUNK_SIZE: u64 = 64 * 1024;
}

pub mod osdb {

    pub const DEFAULT_URL: &str = "https://api.opensubtitles.org/xml-rpc";

    /// The service rejects lookups of more hashes than this.
    pub const MAX_MOVIES_PER_REQUEST: usize = 200;

    pub const MAX_SUBTITLES_PER_REQUEST: usize = 20;
}

pub mod subtitles {

    /// Scores are this minus the download count, so lower is better.
    pub const SCORE_CEILING: u64 = 1_000_000_000;

    pub const DEFAULT_FILENAME: &str = "{Path}.{Language}.{Score}.{Format}";
}
