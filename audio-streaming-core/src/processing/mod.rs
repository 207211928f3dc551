pub mod format_converter;
pub mod pcm_encoder;
