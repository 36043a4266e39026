use tokio_util::codec::LengthDelimitedCodec;

/// Number of bytes in the big-endian length prefix of every frame
pub const LENGTH_FIELD_LEN: usize = 4;
/// Largest JSON command or response accepted on the command channel
pub const CONTROL_MAX_FRAME_LEN: usize = 64 * 1024;
/// Largest JPEG accepted on the video channel
pub const VIDEO_MAX_FRAME_LEN: usize = 8 * 1024 * 1024;

/// Codec for the command channel, each frame carries one JSON object
pub fn control_codec() -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .length_field_length(LENGTH_FIELD_LEN)
        .big_endian()
        .max_frame_length(CONTROL_MAX_FRAME_LEN)
        .new_codec()
}

/// Codec for the video channel, each frame carries one JPEG image
pub fn video_codec() -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .length_field_length(LENGTH_FIELD_LEN)
        .big_endian()
        .max_frame_length(VIDEO_MAX_FRAME_LEN)
        .new_codec()
}
