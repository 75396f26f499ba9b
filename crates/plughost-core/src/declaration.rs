//! Plug-in declarations and the registration export convention.
//!
//! A plug-in package is a shared library exporting one Rust-ABI function,
//! [`PLUG_IN_REGISTER_SYMBOL`]. The host calls it with a
//! [`PlugInRegistrar`] and the package registers one [`PlugInDeclaration`]
//! per plug-in type it contains. [`export_plug_in!`](crate::export_plug_in)
//! writes that function:
//!
//! ```rust,ignore
//! use plughost_core::export_plug_in;
//!
//! export_plug_in!(Poller);
//! ```
//!
//! Host and package must be built with the same compiler and the same
//! `plughost-core` major version; the declaration carries both the API
//! version and the core crate version so mismatches are rejected before any
//! plug-in code runs.

use std::any::type_name;
use std::sync::Arc;

use crate::configuration::PlugInConfiguration;
use crate::device::DevicePublisher;
use crate::error::BuildResult;
use crate::logger::{LogSink, PlugInLogger};
use crate::plug_in::{BoxedPlugIn, PlugInContext, PlugInFactory};

/// Current plug-in API version (1.0).
pub const PLUGHOST_API_VERSION: u32 = 0x0001_0000;

/// Version of the `plughost-core` crate a declaration was compiled against.
pub const PLUGHOST_CORE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Name of the registration function every package exports.
pub const PLUG_IN_REGISTER_SYMBOL: &[u8] = b"plughost_register\0";

/// Signature of the exported registration function.
pub type RegisterFn = fn(&mut dyn PlugInRegistrar);

/// Untyped construction inputs handed to [`PlugInDeclaration::create`].
pub struct PlugInArgs {
    /// Host sink the plug-in's logger writes to.
    pub log_sink: Arc<dyn LogSink>,
    /// Stored configuration JSON, if any.
    pub configuration: Option<String>,
    /// Publisher for device domain events.
    pub publisher: DevicePublisher,
}

/// Static description of one plug-in type inside a package.
#[derive(Debug, Clone, Copy)]
pub struct PlugInDeclaration {
    /// Plug-in API version this declaration was compiled against.
    pub api_version: u32,
    /// `plughost-core` crate version.
    pub core_version: &'static str,
    /// Fully-qualified type name; also the logger category.
    pub type_name: &'static str,
    /// Name of the configuration type, `None` when the plug-in takes none.
    pub configuration_type: Option<&'static str>,
    /// Builds a live plug-in object.
    pub create: fn(PlugInArgs) -> BuildResult<BoxedPlugIn>,
}

impl PlugInDeclaration {
    /// Returns `true` if this declaration can be hosted by this build.
    ///
    /// The major part must match exactly; the declaration's minor part must
    /// be ≤ the host's minor part.
    pub fn is_compatible(&self) -> bool {
        let host_major = PLUGHOST_API_VERSION >> 16;
        let host_minor = PLUGHOST_API_VERSION & 0xFFFF;
        let major = self.api_version >> 16;
        let minor = self.api_version & 0xFFFF;
        major == host_major && minor <= host_minor
    }

    /// Returns the API version as `major.minor`.
    pub fn api_version_string(&self) -> String {
        format!("{}.{}", self.api_version >> 16, self.api_version & 0xFFFF)
    }

    /// Returns `true` when the plug-in declares a configuration type.
    pub fn has_configuration(&self) -> bool {
        self.configuration_type.is_some()
    }

    /// Builds a live plug-in object.
    #[inline]
    pub fn instantiate(&self, args: PlugInArgs) -> BuildResult<BoxedPlugIn> {
        (self.create)(args)
    }
}

/// Collects declarations from a package's registration function.
pub trait PlugInRegistrar {
    fn register(&mut self, declaration: PlugInDeclaration);
}

impl PlugInRegistrar for Vec<PlugInDeclaration> {
    fn register(&mut self, declaration: PlugInDeclaration) {
        self.push(declaration);
    }
}

/// Builds the declaration for plug-in type `T`.
pub fn declare<T: PlugInFactory>() -> PlugInDeclaration {
    PlugInDeclaration {
        api_version: PLUGHOST_API_VERSION,
        core_version: PLUGHOST_CORE_VERSION,
        type_name: type_name::<T>(),
        configuration_type: <T::Configuration as PlugInConfiguration>::DECLARED
            .then_some(<T::Configuration as PlugInConfiguration>::TYPE_NAME),
        create: create_plug_in::<T>,
    }
}

fn create_plug_in<T: PlugInFactory>(args: PlugInArgs) -> BuildResult<BoxedPlugIn> {
    let configuration = T::Configuration::materialize(args.configuration.as_deref())?;
    let logger = PlugInLogger::new(type_name::<T>(), args.log_sink);
    let plug_in = T::create(PlugInContext {
        logger,
        configuration,
        publisher: args.publisher,
    })?;
    Ok(Box::new(plug_in))
}

/// Exports the registration function for one or more plug-in types.
///
/// Use it once per package, at crate root.
#[macro_export]
macro_rules! export_plug_in {
    ($($plug_in:ty),+ $(,)?) => {
        #[unsafe(no_mangle)]
        pub fn plughost_register(registrar: &mut dyn $crate::PlugInRegistrar) {
            $( registrar.register($crate::declare::<$plug_in>()); )+
        }
    };
}
