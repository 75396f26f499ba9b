//! Procedural macros for plughost.
//!
//! - `#[derive(PlugInConfiguration)]` - marks a type as a plug-in's
//!   configuration type
//!
//! # PlugInConfiguration Derive Macro
//!
//! ```rust,ignore
//! use plughost_core::prelude::*;
//!
//! #[derive(Default, Serialize, Deserialize, PlugInConfiguration)]
//! #[configuration(name = "modbus-poller")]
//! pub struct PollerConfig {
//!     pub host: String,
//!     pub interval_ms: u64,
//! }
//! ```

mod configuration;

use proc_macro::TokenStream;
use syn::{DeriveInput, parse_macro_input};

/// Implements `plughost_core::PlugInConfiguration` for a struct or enum.
///
/// The type must also implement `Default`, `serde::Serialize` and
/// `serde::Deserialize`; the trait's supertraits enforce that.
///
/// # Attributes
///
/// - `#[configuration(name = "...")]` - Override the display name (default:
///   the type's identifier)
#[proc_macro_derive(PlugInConfiguration, attributes(configuration))]
pub fn derive_plug_in_configuration(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);

    match configuration::derive_plug_in_configuration(&input) {
        Ok(tokens) => tokens.into(),
        Err(err) => err.to_compile_error().into(),
    }
}
