pub mod ability;
pub mod actors;
pub mod db;
pub mod error;
pub mod export;
pub mod models;
pub mod project;
pub mod registry;
pub mod storage;
pub mod transfer;

// Re-export commonly used types
pub use ability::{Ability, DepositorAbility};
pub use actors::{
    Actor, ActorChain, ActorEnv, ChainResult, ModelActor, Next, Outcome, OwnershipActor,
    WorkAttributes, WorkLinkActor,
};
pub use db::{
    create_backend, BackendType, DatabaseBackend, DatabaseStats, MemoryBackend,
    Repository, SqliteBackend, YamlBackend,
};
pub use error::{DepotError, DepotResult, FieldError, ValidationErrors};
pub use export::{export_markdown, render_markdown};
pub use models::{DepotStore, TransferRequest, TransferStatus, User, Work, WORK_NOT_FOUND_LABEL};
pub use project::determine_repository_path;
pub use registry::{get_registry_path, Registry, RepositoryEntry};
pub use storage::Storage;
pub use transfer::{NewTransfer, TransferService};
