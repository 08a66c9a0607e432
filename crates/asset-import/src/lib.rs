pub mod confirm;
pub mod copier;
pub mod error;
pub mod key;
pub mod manager;
pub mod progress;
pub mod registry;
pub mod settings;

pub use confirm::{AutoConfirm, ConfirmPrompt};
pub use copier::{
    CommandHostCopy, Copier, CopyStrategy, HostCopy, HostCopyOutcome, InteractiveCopier,
    SimpleCopier, SourceKind,
};
pub use error::{CopyError, ImportError, RegistryError};
pub use key::SourceKey;
pub use manager::{AssetManager, ImportOutcome, ImportReport, ImportRequest, ImportResult};
pub use progress::{CopyProgress, ProgressReporter};
pub use registry::{AssetCacheRegistry, CacheStats};
pub use settings::ImportSettings;
pub use tokio_util::sync::CancellationToken;

#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
