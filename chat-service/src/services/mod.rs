pub mod google_auth;
pub mod normalizer;
pub mod providers;
pub mod secrets;
pub mod storage;
pub mod streaming;

pub use normalizer::{AttachmentRef, NormalizedRequest, RequestNormalizer};
pub use providers::ModelClient;
pub use secrets::SecretAccessor;
pub use storage::ObjectStorage;
