//! Shared data model for corral: repository descriptors, clone/sync
//! options, session state, and the error taxonomy every other crate in
//! the workspace builds on.

mod error;
mod options;
mod repository;
mod session;
mod sync;

pub use error::{CorralError, ErrorContext};
pub use options::{CloneOptions, CloneOptionsBuilder, OutputFormat};
pub use repository::{
    Capability, CredentialKind, Credentials, HealthState, HealthStatus, ListOptions, ListSort,
    Protocol, RateLimit, RateLimitResource, Release, ReleaseAsset, ReleaseDraft, Repository,
    RepositoryList, SortDirection, Strategy, TokenInfo, TriState, Visibility,
};
pub use session::{RepoState, RepoStatus, Session, SessionStats};
pub use sync::{SyncFeature, SyncOptions, SyncOptionsBuilder};
