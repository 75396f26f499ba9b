//! Per-package load contexts.
//!
//! Every package (`plug_in_id`) gets its own [`LoadContext`] which owns the
//! libraries loaded for it. Plug-in objects keep their context alive through
//! a [`CodeUnit`]; the host keeps it alive through a [`LoadContextHandle`].
//! Once both are gone the libraries are closed.

mod context;
mod handle;

pub use context::{CodeUnit, LinkedUnitLoader, LoadContext, NativeUnitLoader, UnitLoader};
pub use handle::LoadContextHandle;
