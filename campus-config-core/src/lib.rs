//! Campus config library exports

pub mod error;
pub mod layout;
pub mod settings;
pub mod sync;

pub use error::{Result, SyncError};
pub use layout::{ConfigFileName, ConfigFileType, ConfigLayout};
pub use settings::SyncSettings;
pub use sync::ConfigSync;
