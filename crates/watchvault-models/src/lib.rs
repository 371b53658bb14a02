pub mod detection;
pub mod legacy;
pub mod platform;
pub mod playlist;
pub mod record;
pub mod settings;
pub mod snapshot;

pub use detection::Detection;
pub use legacy::LegacyVideoRecord;
pub use platform::Platform;
pub use playlist::PlaylistIndex;
pub use record::VideoRecord;
pub use settings::{RetentionPolicy, StoreSettings};
pub use snapshot::StoreSnapshot;
