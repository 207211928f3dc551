pub mod audio_encoder;
pub mod authorization_provider;
pub mod capture_source;
pub mod stream_delegate;
pub mod transport;
