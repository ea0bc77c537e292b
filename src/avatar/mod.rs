//! Avatar asset module
//!
//! Loads VRM bundles into an in-memory avatar and owns its live pose buffer.

pub mod loader;
pub mod model;
pub mod vrm;

pub use loader::{parse_avatar, AssetLoader, VrmLoader};
pub use model::{
    Avatar, AvatarLifetime, AvatarPose, ExpressionDef, MeshData, MorphBind, PrimitiveData,
    SkinData, Skeleton,
};
