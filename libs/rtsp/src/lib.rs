pub mod auth;
pub mod client;
pub mod sdp;

pub use self::auth::Credentials;
pub use self::client::RtspClient;
pub use self::sdp::filter_describe;
